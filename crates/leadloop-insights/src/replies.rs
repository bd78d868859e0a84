//! Reply detection over canonical leads.
//!
//! The scalar reply fields are compared case-sensitively against `""`,
//! `"No"` and `"none"`, while the numbered fields are lowercased first. So a
//! scalar `"NO"` counts as a reply but a numbered `"NO"` does not. Both
//! behaviours are relied upon by existing sheets and are kept as they are.

use leadloop_core::CanonicalLead;

const SCALAR_SENTINELS: [&str; 3] = ["", "No", "none"];
const NUMBERED_SENTINELS: [&str; 3] = ["no", "none", ""];

/// Exact comparison against the scalar sentinels.
pub fn is_scalar_reply(value: &str) -> bool {
    !SCALAR_SENTINELS.contains(&value)
}

/// Lowercased comparison against the numbered-field sentinels.
pub fn is_numbered_reply(value: &str) -> bool {
    !NUMBERED_SENTINELS.contains(&value.to_lowercase().as_str())
}

pub fn has_whatsapp_replied(lead: &CanonicalLead) -> bool {
    is_scalar_reply(&lead.whatsapp_replied)
        || lead
            .extended
            .whatsapp_replied
            .values()
            .any(|v| is_numbered_reply(v))
}

pub fn has_email_replied(lead: &CanonicalLead) -> bool {
    is_scalar_reply(&lead.email_replied)
        || lead
            .extended
            .email_replied
            .values()
            .any(|v| is_numbered_reply(v))
}

/// `replied` first, then either channel.
pub fn has_replied(lead: &CanonicalLead) -> bool {
    is_scalar_reply(&lead.replied) || has_email_replied(lead) || has_whatsapp_replied(lead)
}
