//! Message validation and normalization for the relay path.

use url::Url;

use crate::error::{SessionError, SessionResult};
use crate::events::{MemberProfile, RelayedMessage};

/// Build the relayable form of an inbound message.
///
/// A message with neither body text nor an attachment reference is
/// rejected. An attachment reference that does not parse as a URL is
/// dropped and the attachment flag downgraded; the text-only fallback
/// still relays.
pub fn build_message(
    room_id: &str,
    sender: &MemberProfile,
    body: String,
    attachment_url: Option<String>,
) -> SessionResult<RelayedMessage> {
    let has_reference = attachment_url
        .as_deref()
        .map(|url| !url.is_empty())
        .unwrap_or(false);

    if body.is_empty() && !has_reference {
        return Err(SessionError::validation(
            "message needs body text or an attachment",
        ));
    }

    let attachment_url = attachment_url
        .filter(|url| !url.is_empty())
        .filter(|url| Url::parse(url).is_ok());
    let has_attachment = attachment_url.is_some();

    Ok(RelayedMessage {
        public_id: cuid2::create_id(),
        room_id: room_id.to_string(),
        sender: sender.id.clone(),
        sender_name: sender.name.clone(),
        body,
        created_at: chrono::Utc::now().to_rfc3339(),
        attachment_url,
        has_attachment,
    })
}
