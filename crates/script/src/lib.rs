//! Script template matching and typed input/output extraction.

pub mod address;
pub mod input;
pub mod opcodes;
pub mod output;
pub mod standard;

pub use address::{AddressType, DedupAddress, DedupAddressType, RawAddress};
pub use input::{ScriptInput, ScriptInputData, SpendData, WrappedInput, MAX_WRAP_DEPTH};
pub use output::{extract_script_data, AddressResolver, ScriptOutput, ScriptOutputData};
