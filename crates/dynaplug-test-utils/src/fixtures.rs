// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Manifest and filesystem fixtures.

use std::path::Path;

/// A valid manifest whose endpoints map onto [`crate::MockPlugin`] handlers.
///
/// Routes (relative to the plugin namespace):
/// `GET /data`, `POST /echo` (requires JSON with `message`),
/// `GET /items/{id}`, `GET /limited` (2 requests per minute), `GET /boom`.
pub fn test_manifest_toml(id: &str) -> String {
    format!(
        r#"
permissions = ["cluster.read"]

[plugin]
id = "{id}"
name = "Mock {id}"
version = "1.0.0"
description = "mock plugin"
author = "tests"

[[endpoints]]
path = "/data"
method = "GET"
handler = "get_data"

[[endpoints]]
path = "/echo"
method = "POST"
handler = "echo"

[endpoints.validation]
required = ["message"]
content_type = ["application/json"]

[[endpoints]]
path = "/items/{{id}}"
method = "GET"
handler = "get_item"

[[endpoints]]
path = "/limited"
method = "GET"
handler = "limited"

[endpoints.rate_limit]
enabled = true
rpm = 2
burst = 2
window_ms = 60000

[[endpoints]]
path = "/boom"
method = "GET"
handler = "boom"

[configuration]
greeting = "hello"
"#
    )
}

/// The two-route `sample-analytics` manifest.
pub fn sample_analytics_manifest_toml() -> String {
    r#"
[plugin]
id = "sample-analytics"
name = "Sample Analytics"
version = "1.0.0"
description = "request analytics"
author = "Dynaplug Contributors"

[[endpoints]]
path = "/data"
method = "GET"
handler = "get_data"

[[endpoints]]
path = "/metrics"
method = "GET"
handler = "get_metrics"
"#
    .to_string()
}

/// Writes a minimal host workspace: root manifest, an interface crate
/// named `dynaplug-core`, and one aliasable library `dynaplug-config`.
pub fn write_host_workspace(root: &Path) -> std::io::Result<()> {
    std::fs::write(
        root.join("Cargo.toml"),
        "[workspace]\nmembers = [\"crates/*\"]\n\n[workspace.package]\nversion = \"0.1.0\"\nedition = \"2024\"\n\n[workspace.dependencies]\nserde = \"1\"\n",
    )?;
    for (name, lib) in [
        ("dynaplug-core", "pub struct Core;\n"),
        ("dynaplug-config", "pub fn load() {}\n"),
    ] {
        let dir = root.join("crates").join(name);
        std::fs::create_dir_all(dir.join("src"))?;
        std::fs::write(
            dir.join("Cargo.toml"),
            format!("[package]\nname = \"{name}\"\nversion.workspace = true\n"),
        )?;
        std::fs::write(dir.join("src/lib.rs"), lib)?;
    }
    Ok(())
}

/// Writes a plugin source tree (`plugin.toml`, `Cargo.toml`, `src/lib.rs`)
/// using `manifest` as the plugin manifest.
pub fn write_plugin_source(root: &Path, manifest: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(root.join("src"))?;
    std::fs::write(root.join("plugin.toml"), manifest)?;
    std::fs::write(
        root.join("Cargo.toml"),
        "[package]\nname = \"mock-plugin\"\nversion = \"1.0.0\"\n\n[dependencies]\ndynaplug-core = \"*\"\n",
    )?;
    std::fs::write(
        root.join("src/lib.rs"),
        "use dynaplug_config::load;\npub fn touch() { load() }\n",
    )?;
    Ok(())
}
