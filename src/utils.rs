//! Identifier helpers

use bech32::Bech32m;
use uuid7::uuid7;

pub const REQUEST_HRP: &str = "pr_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Short department prefix used in request codes: the first three
/// characters of the name, uppercased.
pub fn department_prefix(name: &str) -> String {
    name.trim().chars().take(3).collect::<String>().to_uppercase()
}
