pub mod earnings;
pub mod encryption;
pub mod fraud;
pub mod ledger;
pub mod ocr;
pub mod pipeline;
pub mod queue;
pub mod tokens;
pub mod worker;
