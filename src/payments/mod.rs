mod bank;

pub use bank::*;
