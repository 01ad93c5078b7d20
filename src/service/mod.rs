pub mod validation;

pub use validation::RecordValidator;
