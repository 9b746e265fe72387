pub mod device_tokens;
pub mod ledger;
