#![doc = include_str!("../README.md")]
//! ## Feature Flags
#![doc = document_features::document_features!()]
#![allow(rustdoc::bare_urls)]
#![no_std]

pub mod rom;
