//! ISCP command text carried inside eISCP frames.
//!
//! A message is `!` + unit type + a 3-character property code + parameter,
//! e.g. `!1PWR01` or `!1MVLQSTN`.

/// Discovery probe broadcast to every unit type (`x`).
pub const DISCOVERY_QUERY: &str = "!xECNQSTN";

/// Prefix of a receiver's answer to [`DISCOVERY_QUERY`].
pub const DISCOVERY_RESPONSE_PREFIX: &str = "!1ECN";

/// Parameter that turns a command into a status query.
pub const QUERY: &str = "QSTN";

/// Value a unit reports for a property it cannot answer right now.
pub const NOT_AVAILABLE: &str = "N/A";

/// System power property.
pub const POWER: &str = "PWR";

/// Master volume property.
pub const MASTER_VOLUME: &str = "MVL";

/// Length of a property code.
pub const CODE_LEN: usize = 3;

/// Build a status query for a property, e.g. `!1PWRQSTN`.
pub fn query_command(code: &str) -> String {
    format!("!1{code}{QUERY}")
}

/// Build a command setting a property, e.g. `!1PWR01`.
pub fn set_command(code: &str, value: &str) -> String {
    format!("!1{code}{value}")
}

/// Split a received message into property code and raw value.
///
/// The code is characters 2..5 and the value everything after it.
pub fn split_property(text: &str) -> Option<(&str, &str)> {
    let code = text.get(2..2 + CODE_LEN)?;
    let value = text.get(2 + CODE_LEN..)?;
    Some((code, value))
}

/// Whether a reported value carries information.
pub fn is_defined(value: &str) -> bool {
    !value.is_empty() && value != NOT_AVAILABLE
}

/// Extract `model/port/region/mac` from a discovery answer.
///
/// Returns `None` for other messages and for echoed probes (`!1ECNQSTN`)
/// sent by other controllers on the network.
pub fn discovery_payload(text: &str) -> Option<&str> {
    let rest = text.strip_prefix(DISCOVERY_RESPONSE_PREFIX)?;
    if rest.starts_with(QUERY) {
        return None;
    }
    Some(rest)
}
