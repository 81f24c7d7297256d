//! Content sniffing and per-kind validation of configuration artifacts.

use serde::Deserialize;

use crate::commands::windows::parse_fragment;
use crate::storage::ProfileKind;

/// Payload identifiers under this prefix are managed by the server itself.
pub const RESERVED_IDENTIFIER_PREFIX: &str = "io.armada.";

/// Payload types that must go through the disk encryption settings instead.
const FORBIDDEN_APPLE_PAYLOAD_TYPES: &[&str] = &[
    "com.apple.MCX.FileVault2",
    "com.apple.security.FDERecoveryKeyEscrow",
];

const DECLARATION_TYPE_PREFIX: &str = "com.apple.configuration.";

const FORBIDDEN_DECLARATION_TYPES: &[&str] = &[
    "com.apple.configuration.management.status-subscriptions",
    "com.apple.configuration.management.server-capabilities",
];

/// Windows CSP paths reserved for disk encryption settings.
const FORBIDDEN_WINDOWS_LOC_URI_PARTS: &[&str] = &["/Vendor/MSFT/BitLocker"];

const UNKNOWN_KIND_MESSAGE: &str = "Couldn't determine the platform. macOS configuration \
     profiles must be a .mobileconfig (XML plist) or a .json declaration, and Windows \
     profiles must be an .xml file of <Replace> or <Add> elements.";

/// A validated artifact's kind and content-derived identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: ProfileKind,
    /// `PayloadIdentifier` or declaration `Identifier`; Windows profiles
    /// have none.
    pub identifier: Option<String>,
}

/// Decide an artifact's kind from its content alone.
pub fn sniff_kind(contents: &str) -> Result<ProfileKind, String> {
    let trimmed = contents.trim_start();
    if trimmed.starts_with('{') {
        return Ok(ProfileKind::AppleDeclaration);
    }
    if trimmed.starts_with("<?xml") || trimmed.starts_with("<!DOCTYPE") || trimmed.starts_with("<plist") {
        if trimmed.contains("<plist") {
            return Ok(ProfileKind::AppleProfile);
        }
        return Ok(ProfileKind::WindowsProfile);
    }
    if trimmed.starts_with("<Replace") || trimmed.starts_with("<Add") {
        return Ok(ProfileKind::WindowsProfile);
    }
    Err(UNKNOWN_KIND_MESSAGE.to_string())
}

/// Classify and validate `contents`, which must already have secrets
/// expanded.
pub fn classify(name: &str, contents: &str) -> Result<Classified, String> {
    let kind = sniff_kind(contents).map_err(|e| format!("Profile \"{name}\": {e}"))?;
    let identifier = match kind {
        ProfileKind::AppleProfile => Some(validate_apple_profile(contents)?),
        ProfileKind::AppleDeclaration => Some(validate_declaration(contents)?),
        ProfileKind::WindowsProfile => {
            validate_windows_profile(name, contents)?;
            None
        }
    };
    Ok(Classified { kind, identifier })
}

/// Validate a configuration profile plist and return its `PayloadIdentifier`.
pub fn validate_apple_profile(contents: &str) -> Result<String, String> {
    let value = plist::Value::from_reader(std::io::Cursor::new(contents.as_bytes()))
        .map_err(|e| format!("Couldn't parse configuration profile: {e}"))?;
    let dict = value
        .as_dictionary()
        .ok_or("Configuration profile must be a dictionary")?;

    let payload_type = dict.get("PayloadType").and_then(plist::Value::as_string);
    if payload_type != Some("Configuration") {
        return Err("Configuration profile PayloadType must be \"Configuration\"".to_string());
    }

    let identifier = dict
        .get("PayloadIdentifier")
        .and_then(plist::Value::as_string)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("Configuration profile is missing PayloadIdentifier")?;
    if identifier.starts_with(RESERVED_IDENTIFIER_PREFIX) {
        return Err(format!(
            "Configuration profile PayloadIdentifier {identifier} uses the reserved prefix {RESERVED_IDENTIFIER_PREFIX}"
        ));
    }

    let payloads = dict
        .get("PayloadContent")
        .and_then(plist::Value::as_array)
        .map_or(&[][..], Vec::as_slice);
    for payload in payloads {
        let Some(payload_type) = payload
            .as_dictionary()
            .and_then(|d| d.get("PayloadType"))
            .and_then(plist::Value::as_string)
        else {
            continue;
        };
        if FORBIDDEN_APPLE_PAYLOAD_TYPES.contains(&payload_type) {
            return Err(format!(
                "Configuration profile can't include {payload_type} payload. \
                 Use the disk encryption settings instead."
            ));
        }
    }

    Ok(identifier.to_string())
}

#[derive(Deserialize)]
struct Declaration {
    #[serde(rename = "Type", default)]
    declaration_type: String,
    #[serde(rename = "Identifier", default)]
    identifier: String,
    #[serde(rename = "Payload")]
    payload: Option<serde_json::Value>,
}

/// Validate a declaration and return its `Identifier`.
pub fn validate_declaration(contents: &str) -> Result<String, String> {
    let decl: Declaration = serde_json::from_str(contents)
        .map_err(|e| format!("Couldn't parse declaration JSON: {e}"))?;

    if decl.identifier.trim().is_empty() {
        return Err("Declaration is missing Identifier".to_string());
    }
    if !decl.declaration_type.starts_with(DECLARATION_TYPE_PREFIX) {
        return Err(format!(
            "Declaration Type must start with {DECLARATION_TYPE_PREFIX}, got \"{}\"",
            decl.declaration_type
        ));
    }
    if FORBIDDEN_DECLARATION_TYPES.contains(&decl.declaration_type.as_str()) {
        return Err(format!(
            "Declaration Type {} is managed by the server and can't be uploaded",
            decl.declaration_type
        ));
    }
    if decl.payload.is_none() {
        return Err("Declaration is missing Payload".to_string());
    }

    Ok(decl.identifier.trim().to_string())
}

/// Validate a Windows profile's `<Replace>`/`<Add>` elements.
pub fn validate_windows_profile(name: &str, contents: &str) -> Result<(), String> {
    let nodes = parse_fragment(contents.as_bytes())
        .map_err(|e| format!("Windows profile \"{name}\" is not valid XML: {e}"))?;
    if nodes.is_empty() {
        return Err(format!("Windows profile \"{name}\" is empty"));
    }

    for node in &nodes {
        if node.name != "Replace" && node.name != "Add" {
            return Err(format!(
                "Windows profile \"{name}\" may only contain <Replace> or <Add> elements, found <{}>",
                node.name
            ));
        }
        let uris = node.loc_uris();
        if uris.iter().all(|u| u.is_empty()) {
            return Err(format!(
                "Windows profile \"{name}\" has a <{}> element without a <LocURI>",
                node.name
            ));
        }
        if let Some(uri) = uris.iter().find(|u| {
            FORBIDDEN_WINDOWS_LOC_URI_PARTS
                .iter()
                .any(|part| u.contains(part))
        }) {
            return Err(format!(
                "Windows profile \"{name}\" can't target {uri}. Use the disk encryption settings instead."
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn mobileconfig(identifier: &str, payload_type: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>PayloadContent</key>
    <array>
        <dict>
            <key>PayloadType</key>
            <string>{payload_type}</string>
            <key>PayloadIdentifier</key>
            <string>{identifier}.payload</string>
        </dict>
    </array>
    <key>PayloadDisplayName</key>
    <string>{identifier}</string>
    <key>PayloadIdentifier</key>
    <string>{identifier}</string>
    <key>PayloadType</key>
    <string>Configuration</string>
    <key>PayloadUUID</key>
    <string>5E1B1E7D-0000-4000-8000-000000000001</string>
    <key>PayloadVersion</key>
    <integer>1</integer>
</dict>
</plist>"#
        )
    }

    pub(crate) fn declaration(identifier: &str) -> String {
        format!(
            r#"{{"Type": "com.apple.configuration.passcode.settings", "Identifier": "{identifier}", "Payload": {{"RequireAlphanumericPasscode": true}}}}"#
        )
    }

    pub(crate) fn windows_profile(loc_uri: &str) -> String {
        format!(
            "<Replace><Item><Target><LocURI>{loc_uri}</LocURI></Target>\
             <Data>1</Data></Item></Replace>"
        )
    }

    #[test]
    fn sniffs_each_kind() {
        assert_eq!(
            sniff_kind(&mobileconfig("com.example.wifi", "com.apple.wifi.managed")).unwrap(),
            ProfileKind::AppleProfile
        );
        assert_eq!(
            sniff_kind(&declaration("com.example.passcode")).unwrap(),
            ProfileKind::AppleDeclaration
        );
        assert_eq!(
            sniff_kind(&windows_profile("./Device/Vendor/MSFT/Policy/Config/Camera/AllowCamera"))
                .unwrap(),
            ProfileKind::WindowsProfile
        );
        assert!(sniff_kind("plain text").is_err());
    }

    #[test]
    fn apple_profile_yields_identifier() {
        let c = classify("wifi", &mobileconfig("com.example.wifi", "com.apple.wifi.managed")).unwrap();
        assert_eq!(c.kind, ProfileKind::AppleProfile);
        assert_eq!(c.identifier.as_deref(), Some("com.example.wifi"));
    }

    #[test]
    fn reserved_identifier_prefix_is_rejected() {
        let err = validate_apple_profile(&mobileconfig("io.armada.enroll", "com.apple.wifi.managed"))
            .unwrap_err();
        assert!(err.contains("reserved"));
    }

    #[test]
    fn filevault_payload_is_rejected() {
        let err = validate_apple_profile(&mobileconfig("com.example.fv", "com.apple.MCX.FileVault2"))
            .unwrap_err();
        assert!(err.contains("FileVault2"));
    }

    #[test]
    fn declaration_type_rules() {
        assert_eq!(
            validate_declaration(&declaration("com.example.p")).unwrap(),
            "com.example.p"
        );
        let bad = r#"{"Type": "com.apple.activation.simple", "Identifier": "x", "Payload": {}}"#;
        assert!(validate_declaration(bad).is_err());
        let reserved = r#"{"Type": "com.apple.configuration.management.status-subscriptions", "Identifier": "x", "Payload": {}}"#;
        assert!(validate_declaration(reserved).is_err());
        let no_payload = r#"{"Type": "com.apple.configuration.passcode.settings", "Identifier": "x"}"#;
        assert!(validate_declaration(no_payload).is_err());
    }

    #[test]
    fn windows_profile_rules() {
        assert!(validate_windows_profile("ok", &windows_profile("./Device/Vendor/MSFT/Policy/Config/Camera/AllowCamera")).is_ok());
        assert!(validate_windows_profile("bl", &windows_profile("./Device/Vendor/MSFT/BitLocker/RequireDeviceEncryption")).is_err());
        assert!(validate_windows_profile("exec", "<Exec><Item><Target><LocURI>./x</LocURI></Target></Item></Exec>").is_err());
        assert!(validate_windows_profile("nouri", "<Replace><Item><Data>1</Data></Item></Replace>").is_err());
    }
}
