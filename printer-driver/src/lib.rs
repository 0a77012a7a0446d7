//! # printer-driver
//!
//! Low-level printing capabilities only.
//!
//! ## Scope
//!
//! This crate handles HOW bytes reach a printer:
//! - Raw TCP printing (port 9100 profile)
//! - OS print spool (`lp`), raw or formatted mode
//! - Spool registry listing (`lpstat`)
//! - ESC/POS command building (test pages, cut, cash drawer, buzzer)
//!
//! Deciding WHAT to print and WHICH path to take stays in the agent.
//!
//! ## Example
//!
//! ```ignore
//! use printer_driver::{EscPosBuilder, NetworkPrinter, Printer};
//!
//! let mut builder = EscPosBuilder::new(48);
//! builder.center().double_size().line("TEST").reset_size();
//! builder.sep_single();
//! builder.cut();
//!
//! let printer = NetworkPrinter::new("192.168.1.100", 9100)?;
//! printer.print(&builder.build()).await?;
//! ```

mod error;
mod escpos;
mod printer;
mod spool;

// Re-exports
pub use error::{PrintError, PrintResult};
pub use escpos::{EscPosBuilder, PageFeatures, TestPage, render_text};
pub use printer::{NetworkPrinter, Printer, probe_tcp};
pub use spool::{
    CommandOutput, CommandRunner, SpoolEntry, SpoolMode, SpoolPrinter, SpoolState,
    SystemCommandRunner, list_printers, parse_lpstat,
};
