macro_rules! assert_unique_features {
    ($($feature:literal),+ $(,)?) => {
        if (0 $(+ cfg!(feature = $feature) as usize)+ ) > 1 {
            return Err(format!(
                "Exactly zero or one of the following features must be enabled: {}",
                [$($feature),+].join(", ")
            ));
        }
    };
}

fn main() -> Result<(), String> {
    // Log and defmt are mutually exclusive features.
    assert_unique_features!("log-04", "defmt");

    if cfg!(feature = "emulation") && cfg!(feature = "defmt") {
        return Err(String::from(
            "The `emulation` feature runs on the host and cannot be combined with `defmt`",
        ));
    }

    println!("cargo:rerun-if-changed=build.rs");

    Ok(())
}
