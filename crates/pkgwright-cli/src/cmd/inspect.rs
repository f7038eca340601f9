//! Inspect command

use anyhow::{Context, Result, bail};
use pkgwright_core::PackageInfo;
use pkgwright_core::signature::verify_ed25519;
use pkgwright_schema::{Header, SigTag, Tag, TagValue};
use serde_json::{Map, Value, json};
use std::path::Path;

/// Print the metadata blocks of `file` and check its digest.
pub fn inspect(file: &Path, json: bool, public_key: Option<&str>) -> Result<()> {
    let info = PackageInfo::read(file)
        .with_context(|| format!("Failed to read package {}", file.display()))?;

    let signed = match (public_key, info.signature.get(SigTag::ED25519)) {
        (Some(key), Some(TagValue::Bin(record))) => {
            verify_ed25519(key, &info.region_digest.to_bytes(), record)
                .context("Signature does not verify")?;
            Some(true)
        }
        (Some(_), _) => bail!("Package carries no Ed25519 signature"),
        (None, _) => None,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&to_json(&info, signed))?);
    } else {
        print_table(&info, signed);
    }

    if !info.size_matches() || !info.digest_matches() {
        bail!("{} is corrupt: size or digest mismatch", file.display());
    }
    Ok(())
}

fn header_json(header: &Header, name: impl Fn(Tag) -> String) -> Value {
    let mut map = Map::new();
    for (tag, value) in header.iter() {
        let v = match value {
            TagValue::Int32(v) if v.len() == 1 => json!(v[0]),
            TagValue::Int64(v) if v.len() == 1 => json!(v[0]),
            TagValue::StringArray(v) => json!(v),
            other => json!(other.to_string()),
        };
        map.insert(name(tag), v);
    }
    Value::Object(map)
}

fn sig_name(tag: Tag) -> String {
    SigTag::name(tag).map_or_else(|| format!("tag {}", tag.0), str::to_string)
}

fn to_json(info: &PackageInfo, signed: Option<bool>) -> Value {
    json!({
        "lead": {
            "name": info.lead.name,
            "kind": info.lead.kind.to_string(),
            "arch": info.lead.arch,
            "os": info.lead.os,
            "version": format!("{}.{}", info.lead.major, info.lead.minor),
        },
        "signature": header_json(&info.signature, sig_name),
        "header": header_json(&info.header, |t| t.to_string()),
        "region": {
            "offset": info.region_offset,
            "size": info.region_size,
            "sha256": info.region_digest.as_str(),
            "size_ok": info.size_matches(),
            "digest_ok": info.digest_matches(),
            "signature_ok": signed,
        },
        "payload": {
            "offset": info.payload_offset,
            "size": info.payload_size(),
        },
    })
}

fn print_table(info: &PackageInfo, signed: Option<bool>) {
    let lw = 20;
    let ok = |b: bool| if b { "ok" } else { "MISMATCH" };

    println!();
    println!("  {} ({})", info.lead.name, info.lead.kind);
    println!();
    println!("  {:<lw$}{}", "region size", info.region_size);
    println!("  {:<lw$}{}", "size", ok(info.size_matches()));
    println!("  {:<lw$}{}", "sha256", ok(info.digest_matches()));
    if let Some(s) = signed {
        println!("  {:<lw$}{}", "ed25519", ok(s));
    }
    println!("  {:<lw$}{}", "payload", info.payload_size());
    println!();

    println!("  signature");
    for (tag, value) in info.signature.iter() {
        println!("    {:<lw$}{}", sig_name(tag), value);
    }
    println!();

    println!("  header");
    for (tag, value) in info.header.iter() {
        let text = value.to_string();
        let first = text.lines().next().unwrap_or_default();
        let more = if text.lines().count() > 1 { " ..." } else { "" };
        println!("    {:<lw$}{first}{more}", tag.to_string());
    }
    println!();
}
