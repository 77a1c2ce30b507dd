pub mod dead_letter;
pub mod memory;
pub mod object_store;
pub mod s3;
pub mod sqs;
pub mod upstream;
