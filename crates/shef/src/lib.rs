//! # shef: SHEF decoding and composition
//!
//! This crate decodes the Standard Hydrometeorologic Exchange Format
//! (SHEF), the free-form text format defined by NOAA/NWS (version 2.2,
//! 2012) for hydrometeorological observations and forecasts, and composes
//! conforming SHEF text from decoded values.
//!
//! Decoding is a three-stage pipeline over a shared, read-only
//! [`ParamRegistry`]:
//!
//! 1. a [`Tokenizer`] segments a byte stream into complete `.A`/`.B`/`.E`
//!    messages, stitching continuation lines and stripping throwaway
//!    `:comment:` text;
//! 2. a [`Decoder`] expands each message into typed [`ShefValue`]
//!    observations, resolving the inherited defaults (date, time, zone,
//!    creation time, units, duration, qualifier, retained comment) that
//!    SHEF lets producers omit, and converting times to UTC;
//! 3. the [`emitter`] renders each value in one of two fixed-column text
//!    formats, re-parses those formats, and composes `.A`/`.E` text from
//!    sorted series.
//!
//! ## Example
//!
//! ```
//! use std::io::Cursor;
//! use shef::{Decoder, DecoderOptions, ParamRegistry, Tokenizer};
//!
//! let registry = ParamRegistry::default();
//! let mut decoder = Decoder::new(&registry, DecoderOptions::default());
//! let mut messages =
//!     Tokenizer::new(Cursor::new(".E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/637.73\n"));
//!
//! let mut values = Vec::new();
//! while let Some(record) = messages.next_message().unwrap() {
//!     values.extend(decoder.decode(&record));
//! }
//!
//! assert_eq!(values.len(), 2);
//! assert_eq!(values[0].parameter_code, "HTIRZZZ");
//! assert_eq!(
//!     shef::emitter::emit_format1(&values[0], &registry).unwrap(),
//!     "KEYO2     2025-11-07 14:00:00  0000-00-00 00:00:00  HTIRZZ        \
//!      637.7400 Z   -1.000  0000 0 1            \" \""
//! );
//! ```
//!
//! SHEF is intentionally lenient: whitespace is optional in many places,
//! nearly every field has defaults that cascade across continuation lines,
//! and a single malformed token must not poison the remainder of a
//! multi-value message. By default the decoder recovers at the next field
//! delimiter and keeps mining valid values; strict mode
//! ([`DecoderOptions::strict`]) rejects every value from a message that
//! produced any error.
//!
//! Registry defaults match the tables distributed with the NWS SHEFPARM
//! file and may be overridden by one
//! ([`ParamRegistry::merge_shefparm`]). Time handling defaults to
//! tz-database rules; [`TimeModel::Legacy`] reproduces the arithmetic of
//! the reference `shefit` decoder bug-for-bug.

mod builtin;
mod decoder;
mod error;
mod registry;
mod time;
mod tokenizer;
mod value;

pub mod emitter;

pub use decoder::{Decoder, DecoderOptions};
pub use emitter::OutputFormat;
pub use error::ShefError;
pub use registry::{OverrideDiagnostic, ParamRegistry, PeEntry};
pub use time::{ShefZone, TimeModel};
pub use tokenizer::{MessageKind, MessageRecord, Tokenizer};
pub use value::{ShefValue, MISSING_VALUE, TRACE_VALUE};
