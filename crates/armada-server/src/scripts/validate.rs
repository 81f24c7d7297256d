//! Script content checks that run before any authorization.

/// Interpreters a script may select with a `#!` line.
pub const ALLOWED_SHEBANGS: &[&str] = &[
    "#!/bin/sh",
    "#!/bin/bash",
    "#!/bin/zsh",
    "#!/usr/bin/bash",
    "#!/usr/bin/zsh",
    "#!/usr/bin/env bash",
    "#!/usr/bin/env zsh",
];

/// Decode uploaded script bytes.
pub fn decode_contents(raw: Vec<u8>) -> Result<String, String> {
    String::from_utf8(raw).map_err(|_| "Script contents must be valid UTF-8.".to_string())
}

/// Check script contents against the size ceiling and interpreter rules.
pub fn validate_contents(contents: &str, max_chars: usize) -> Result<(), String> {
    if contents.trim().is_empty() {
        return Err("Script contents must not be empty.".to_string());
    }

    if contents.chars().count() > max_chars {
        return Err(format!(
            "Script is too large. It's limited to {max_chars} characters."
        ));
    }

    let first_line = contents.lines().next().unwrap_or_default().trim_end();
    if first_line.starts_with("#!") && !ALLOWED_SHEBANGS.contains(&first_line) {
        return Err(format!(
            "Interpreter not supported: {first_line}. Scripts may start with one of: {}",
            ALLOWED_SHEBANGS.join(", ")
        ));
    }

    Ok(())
}
