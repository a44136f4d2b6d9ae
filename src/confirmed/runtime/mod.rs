pub mod driver;

pub use driver::{ConfirmedScanner, ScannerHandle};
