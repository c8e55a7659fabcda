pub mod justwatch;

pub use justwatch::JustWatchSource;
