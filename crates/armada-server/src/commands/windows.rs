//! Windows MDM (`SyncML`) command fragments.
//!
//! Commands and profiles arrive as bare `SyncML` elements without the
//! surrounding `<SyncML>`/`<SyncBody>` envelope, e.g.
//!
//! ```xml
//! <Exec>
//!   <CmdID>1</CmdID>
//!   <Item><Target><LocURI>./Device/Vendor/MSFT/Reboot/RebootNow</LocURI></Target></Item>
//! </Exec>
//! ```

use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// `LocURI` prefixes whose commands require a premium license.
const PREMIUM_LOC_URI_PREFIXES: &[&str] = &[
    "./Device/Vendor/MSFT/RemoteWipe/",
    "./Device/Vendor/MSFT/RemoteLock/",
];

/// A parsed XML element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<Self>,
}

impl XmlNode {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    pub fn child(&self, name: &str) -> Option<&Self> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Follow a path of child names.
    pub fn path(&self, names: &[&str]) -> Option<&Self> {
        names.iter().try_fold(self, |node, name| node.child(name))
    }

    /// Every `LocURI` below this element, in document order.
    pub fn loc_uris(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_loc_uris(&mut out);
        out
    }

    fn collect_loc_uris<'a>(&'a self, out: &mut Vec<&'a str>) {
        if self.name == "LocURI" {
            out.push(self.text.trim());
        }
        for child in &self.children {
            child.collect_loc_uris(out);
        }
    }
}

/// Parse a sequence of top-level XML elements.
pub fn parse_fragment(raw: &[u8]) -> Result<Vec<XmlNode>, String> {
    let mut reader = Reader::from_reader(raw);
    reader.config_mut().trim_text(true);

    let mut roots = Vec::new();
    let mut stack: Vec<XmlNode> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                stack.push(XmlNode::new(name));
            }
            Ok(Event::Empty(e)) => {
                let node = XmlNode::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => roots.push(node),
                }
            }
            Ok(Event::End(_)) => {
                let Some(node) = stack.pop() else {
                    return Err("unexpected closing tag".to_string());
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => roots.push(node),
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| format!("invalid XML text: {e}"))?;
                match stack.last_mut() {
                    Some(node) => node.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => return Err("text outside of an element".to_string()),
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "invalid XML at position {}: {e}",
                    reader.error_position()
                ));
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("unclosed <{}> element", open.name));
    }
    Ok(roots)
}

/// A decoded Windows MDM command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowsCommand {
    pub cmd_id: String,
    pub target_loc_uri: String,
}

/// Decode a raw `<Exec>` command, requiring a `CmdID` and a target `LocURI`.
pub fn decode_command(raw: &[u8]) -> Result<WindowsCommand, String> {
    let roots = parse_fragment(raw).map_err(|e| format!("unable to decode SyncML command: {e}"))?;

    let [exec] = roots.as_slice() else {
        return Err("SyncML command must contain exactly one element".to_string());
    };
    if exec.name != "Exec" {
        return Err(format!(
            "unsupported SyncML command <{}>; only <Exec> commands can be run",
            exec.name
        ));
    }

    let cmd_id = exec.child("CmdID").map_or("", |n| n.text.trim());
    if cmd_id.is_empty() {
        return Err("SyncML command is missing CmdID".to_string());
    }

    let target_loc_uri = exec
        .path(&["Item", "Target", "LocURI"])
        .map_or("", |n| n.text.trim());
    if target_loc_uri.is_empty() {
        return Err("SyncML command is missing Item/Target/LocURI".to_string());
    }

    Ok(WindowsCommand {
        cmd_id: cmd_id.to_string(),
        target_loc_uri: target_loc_uri.to_string(),
    })
}

/// Whether a command target is gated behind a premium license.
pub fn is_premium_target(loc_uri: &str) -> bool {
    PREMIUM_LOC_URI_PREFIXES
        .iter()
        .any(|prefix| loc_uri.starts_with(prefix))
}

/// Wrap a profile's `<Replace>`/`<Add>` elements in an `<Atomic>` command.
pub fn encode_profile_command(command_uuid: &str, profile: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(profile.len() + 64);
    out.extend_from_slice(b"<Atomic><CmdID>");
    out.extend_from_slice(command_uuid.as_bytes());
    out.extend_from_slice(b"</CmdID>");
    out.extend_from_slice(profile);
    out.extend_from_slice(b"</Atomic>");
    out
}
