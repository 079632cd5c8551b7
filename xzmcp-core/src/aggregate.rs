//! `xzcli` aggregated tool naming convention: a downstream tool
//! re-exposed without customisation is named
//! `${serviceName}_xzcli_${originalName}`, with every hyphen in `serviceName`
//! normalised to underscore. The reverse mapping is total for this shape.

const SEP: &str = "_xzcli_";

pub fn normalize_service_name(service_name: &str) -> String {
    service_name.replace('-', "_")
}

pub fn encode(service_name: &str, original_name: &str) -> String {
    format!("{}{SEP}{}", normalize_service_name(service_name), original_name)
}

/// Reverses `encode`. Because hyphens are normalised away on encode, this
/// cannot recover a hyphenated original service name — it returns the
/// normalised form, which is what every other component keys services by.
pub fn decode(public_name: &str) -> Option<(String, String)> {
    let idx = public_name.find(SEP)?;
    let (service, rest) = public_name.split_at(idx);
    let original = &rest[SEP.len()..];
    if service.is_empty() || original.is_empty() {
        return None;
    }
    Some((service.to_string(), original.to_string()))
}
