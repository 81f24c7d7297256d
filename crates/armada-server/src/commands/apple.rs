//! Apple MDM command plists.

use serde::Deserialize;

/// Request types that require a premium license.
pub const PREMIUM_REQUEST_TYPES: &[&str] = &["EraseDevice", "DeviceLock"];

/// A decoded Apple MDM command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppleCommand {
    pub command_uuid: String,
    pub request_type: String,
}

#[derive(Deserialize)]
struct CommandEnvelope {
    #[serde(rename = "CommandUUID")]
    command_uuid: String,
    #[serde(rename = "Command")]
    command: CommandBody,
}

#[derive(Deserialize)]
struct CommandBody {
    #[serde(rename = "RequestType")]
    request_type: String,
}

/// Decode a raw command plist, requiring a command uuid and request type.
pub fn decode_command(raw: &[u8]) -> Result<AppleCommand, String> {
    let envelope: CommandEnvelope =
        plist::from_bytes(raw).map_err(|e| format!("unable to decode plist command: {e}"))?;

    let command_uuid = envelope.command_uuid.trim();
    if command_uuid.is_empty() {
        return Err("command plist is missing CommandUUID".to_string());
    }
    let request_type = envelope.command.request_type.trim();
    if request_type.is_empty() {
        return Err("command plist is missing Command.RequestType".to_string());
    }

    Ok(AppleCommand {
        command_uuid: command_uuid.to_string(),
        request_type: request_type.to_string(),
    })
}

/// Whether a request type is gated behind a premium license.
pub fn is_premium_request(request_type: &str) -> bool {
    PREMIUM_REQUEST_TYPES.contains(&request_type)
}

/// Build an `InstallProfile` command carrying `profile`.
pub fn encode_install_profile(command_uuid: &str, profile: &[u8]) -> Result<Vec<u8>, String> {
    let mut command = plist::Dictionary::new();
    command.insert("RequestType".into(), "InstallProfile".into());
    command.insert("Payload".into(), plist::Value::Data(profile.to_vec()));
    encode_envelope(command_uuid, command)
}

/// Build a `DeclarativeManagement` command asking the device to sync
/// declarations.
pub fn encode_declarative_management(command_uuid: &str) -> Result<Vec<u8>, String> {
    let mut command = plist::Dictionary::new();
    command.insert("RequestType".into(), "DeclarativeManagement".into());
    encode_envelope(command_uuid, command)
}

fn encode_envelope(command_uuid: &str, command: plist::Dictionary) -> Result<Vec<u8>, String> {
    let mut envelope = plist::Dictionary::new();
    envelope.insert("CommandUUID".into(), command_uuid.into());
    envelope.insert("Command".into(), plist::Value::Dictionary(command));

    let mut buf = Vec::new();
    plist::Value::Dictionary(envelope)
        .to_writer_xml(&mut buf)
        .map_err(|e| format!("unable to encode plist command: {e}"))?;
    Ok(buf)
}
