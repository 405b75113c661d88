//! Prompt construction and body normalization.

use crate::mail::Email;

/// Fixed system message sent with every request.
pub const SYSTEM_PROMPT: &str =
    "You are a precise email classifier. Respond with JSON only, no thinking or explanation.";

/// Characters scanned backwards from "wrote:" for the "On" that opens a
/// quoted-reply header.
const QUOTE_HEADER_WINDOW: usize = 200;

/// A system/user message pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// System message.
    pub system: String,
    /// User message.
    pub user: String,
}

/// Build the classification prompt for an email.
///
/// The output depends only on the email and `max_body_chars`.
#[must_use]
pub fn build_prompt(email: &Email, max_body_chars: usize) -> Prompt {
    let body = normalize_body(email);
    let body = truncate_chars(&body, max_body_chars);

    let user = format!(
        r#"Classify this email. Output JSON only, no thinking or explanation.

SENDER: {sender}
SUBJECT: {subject}
DATE: {date}
CONTENT: {body}

Rules:
- Work emails: importance 7-9
- Orders/shipping/deliveries: importance 6-7
- Personal emails: importance 6-8
- Travel bookings and itineraries: importance 6-8
- Finance (banking, invoices, receipts): importance 5-8
- Calendar invites and event reminders: importance 5-7
- Software licences and renewals: importance 4-6
- Notifications: importance 3-5
- Marketing/newsletters: importance 1-3
- Unknown/suspicious senders: higher spam score

Orders category includes: Amazon, retailers, shipping companies (UPS/FedEx/USPS), order confirmations, delivery updates, tracking info.

Output this exact JSON format:
{{"importance_score": [0-10], "spam_score": [0-10], "category": "[work/personal/orders/newsletter/promotion/spam/notification/travel/finance/calendar/software_license]", "reasoning": "[brief]", "confidence": [0.0-1.0]}}"#,
        sender = email.sender,
        subject = email.subject,
        date = email.received_at.format("%Y-%m-%d %H:%M UTC"),
    );

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Plain-text body with quoted replies cut and whitespace collapsed.
///
/// HTML is converted only when there is no plain-text part.
#[must_use]
pub fn normalize_body(email: &Email) -> String {
    let text = match email.body_html.as_deref() {
        Some(html) if email.body.trim().is_empty() => match htmd::convert(html) {
            Ok(markdown) => markdown,
            Err(e) => {
                tracing::warn!(email_id = %email.id, error = %e, "HTML conversion failed");
                String::new()
            }
        },
        _ => email.body.clone(),
    };

    let unquoted = text
        .lines()
        .filter(|line| !line.trim_start().starts_with('>'))
        .collect::<Vec<_>>()
        .join("\n");
    let collapsed = unquoted.split_whitespace().collect::<Vec<_>>().join(" ");

    cut_quoted_reply(&collapsed).trim_end().to_string()
}

/// Cut everything from an "On ... wrote:" reply header onwards.
fn cut_quoted_reply(text: &str) -> &str {
    let Some(wrote) = text.find("wrote:") else {
        return text;
    };
    let head = &text[..wrote];
    match head.rfind("On ") {
        Some(start) if head[start..].chars().count() <= QUOTE_HEADER_WINDOW => &text[..start],
        _ => text,
    }
}

/// The first `max_chars` characters of `s`.
#[must_use]
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
