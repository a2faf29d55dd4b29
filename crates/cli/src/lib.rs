//! Operator commands for bearer values and encoded privilege columns.
//!
//! ```text
//! gatehouse token encode <principal-id> <secret>
//! gatehouse token decode <bearer>
//! gatehouse privileges decode <encoded>
//! gatehouse privileges rename <old> <new>    (encoded columns on stdin, one per line)
//! gatehouse privileges catalog
//! ```

use std::io::{BufRead, Write};

use anyhow::{Context, anyhow, bail};
use serde_json::json;

use gatehouse_auth::{Privilege, PrivilegeCatalog, PrivilegeSet, decode_bearer, encode_bearer, rename_encoded};
use gatehouse_core::PrincipalId;

const USAGE: &str = "usage: gatehouse <token encode|token decode|privileges decode|privileges rename|privileges catalog> [args]";

pub fn run<R, W>(args: &[String], input: R, mut out: W) -> anyhow::Result<()>
where
    R: BufRead,
    W: Write,
{
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["token", "encode", principal, secret] => {
            let principal: PrincipalId = principal.parse().context("principal id")?;
            writeln!(out, "{}", encode_bearer(principal, secret))?;
        }
        ["token", "decode", bearer] => {
            let Some((principal_id, secret)) = decode_bearer(bearer) else {
                bail!("not a valid bearer value");
            };
            writeln!(out, "{}", json!({ "principal_id": principal_id, "secret": secret }))?;
        }
        ["privileges", "decode", encoded] => {
            let set = PrivilegeSet::decode(encoded).context("encoded privilege set")?;
            let names: Vec<&str> = set.iter().map(Privilege::as_str).collect();
            writeln!(out, "{}", json!(names))?;
        }
        ["privileges", "rename", old, new] => {
            let old = Privilege::parse(old.to_string()).context("old privilege")?;
            let new = Privilege::parse(new.to_string()).context("new privilege")?;
            let rewritten = rename_lines(input, &mut out, &old, &new)?;
            tracing::info!(%old, %new, rewritten, "encoded columns renamed");
        }
        ["privileges", "catalog"] => {
            let catalog = PrivilegeCatalog::builtin();
            let grouped: serde_json::Map<String, serde_json::Value> = catalog
                .by_category()
                .into_iter()
                .map(|(category, defs)| {
                    let entries: Vec<_> = defs
                        .iter()
                        .map(|d| json!({ "privilege": d.privilege.as_str(), "description": d.description }))
                        .collect();
                    (category.to_string(), json!(entries))
                })
                .collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&grouped)?)?;
        }
        _ => bail!(USAGE),
    }
    Ok(())
}

/// Rewrite each encoded column read from `input`; unchanged lines are echoed.
///
/// A column that already holds `new` stops the run, as the stored rename does.
fn rename_lines<R, W>(input: R, out: &mut W, old: &Privilege, new: &Privilege) -> anyhow::Result<usize>
where
    R: BufRead,
    W: Write,
{
    if old == new {
        bail!("cannot rename '{old}' onto itself");
    }
    let mut rewritten = 0;
    for (n, line) in input.lines().enumerate() {
        let line = line?;
        let encoded = line.trim_end();
        let context = || format!("line {}", n + 1);
        let set = PrivilegeSet::decode(encoded).with_context(context)?;
        if set.contains(new) {
            return Err(anyhow!("privilege '{new}' is already in use")).with_context(context);
        }
        match rename_encoded(encoded, old, new).with_context(context)? {
            Some(updated) => {
                rewritten += 1;
                writeln!(out, "{updated}")?;
            }
            None => writeln!(out, "{encoded}")?,
        }
    }
    Ok(rewritten)
}
