// Scan Module: the loop construct and the rewrites that see through it
//
// A Scan apply owns a nested body graph. Its rewrites decompose the apply
// into role-tagged parts, edit the body and rebuild a fresh Scan whose
// contract is checked again before it can replace the old one.

pub mod cleanup;
pub mod nested;
pub mod op;
pub mod parts;
pub mod pushout;

// Re-exports
pub use cleanup::{ScanForwardOutputs, ScanMergeInouts, ScanRemoveUnused};
pub use nested::ScanBodyRewrite;
pub use op::{ScanOp, ScanSignature, StoreMode};
pub use parts::{BuiltScan, InnerRole, InputPart, OutputPart, RecurrentPart, ScanParts};
pub use pushout::{ScanPushoutAdd, ScanPushoutNonSeqs, ScanPushoutSeqs};
