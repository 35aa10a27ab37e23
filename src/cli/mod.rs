//! CLI commands for stashd
//!
//! ```bash
//! # Upload a file (one streaming PUT, or adaptive with --stream)
//! stashd put ./report.pdf reports/2024/report.pdf --content-type application/pdf
//!
//! # Download to a file, or to stdout when no output is given
//! stashd get reports/2024/report.pdf ./report.pdf
//!
//! # Delete one or more objects
//! stashd rm reports/2024/report.pdf reports/2024/old.pdf
//!
//! # Object info, existence check, presigned URL
//! stashd stat reports/2024/report.pdf
//! stashd exists reports/2024/report.pdf
//! stashd presign reports/2024/report.pdf --minutes 30
//! ```

pub mod commands;
