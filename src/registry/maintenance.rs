//! Maintenance-argument discovery
//!
//! A training script marks operational flags (resume paths, device picks)
//! by wrapping their declarations in a region:
//!
//! ```text
//! // region maintenance args
//! #[arg(long)]
//! resume_path: Option<PathBuf>,
//! // endregion
//! ```
//!
//! Keys declared there never reach the index and never take part in
//! duplicate detection.

use std::collections::BTreeSet;

const REGION_OPEN: &str = "region maintenance args";
const REGION_CLOSE: &str = "endregion";

/// Names of the maintenance arguments declared in `source`, normalised to
/// configuration keys (`--resume-path` becomes `resume_path`).
pub fn maintenance_args(source: &str) -> BTreeSet<String> {
    let Some(open) = source.find(REGION_OPEN) else {
        return BTreeSet::new();
    };
    let body = &source[open + REGION_OPEN.len()..];
    let region = match body.find(REGION_CLOSE) {
        Some(close) => &body[..close],
        None => body,
    };

    let mut names = quoted_flags(region);
    names.extend(derive_fields(region));
    names
}

/// `"--name"` / `'--name'` literals, as in argparse `add_argument('--name')`
/// or clap `long = "name"` written with the dashes.
fn quoted_flags(region: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for (idx, _) in region.match_indices("--") {
        let preceded_by_quote = region[..idx].ends_with('"') || region[..idx].ends_with('\'');
        if !preceded_by_quote {
            continue;
        }
        let name: String = region[idx + 2..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if !name.is_empty() {
            names.insert(normalise(&name));
        }
    }
    names
}

/// Field names following a `#[arg(long ...)]` attribute. The attribute may
/// span several lines, and the field may follow it on the same line.
fn derive_fields(region: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    // Some(saw_long) while inside an unclosed `#[arg(`
    let mut open_attr: Option<bool> = None;
    let mut pending = false;

    for line in region.lines() {
        let mut rest = line.trim();
        loop {
            if let Some(saw_long) = open_attr {
                match rest.find(")]") {
                    Some(end) => {
                        pending |= saw_long || rest[..end].contains("long");
                        open_attr = None;
                        rest = rest[end + 2..].trim_start();
                    }
                    None => {
                        open_attr = Some(saw_long || rest.contains("long"));
                        break;
                    }
                }
            } else if let Some(attr) = rest.strip_prefix("#[arg(") {
                open_attr = Some(false);
                rest = attr;
            } else if rest.is_empty() || rest.starts_with("//") {
                break;
            } else if rest.starts_with("#[") {
                // some other attribute
                match rest.find(']') {
                    Some(end) => rest = rest[end + 1..].trim_start(),
                    None => break,
                }
            } else {
                if pending {
                    if let Some(field) = field_name(rest) {
                        names.insert(normalise(field));
                    }
                }
                pending = false;
                break;
            }
        }
    }
    names
}

fn field_name(decl: &str) -> Option<&str> {
    let decl = decl
        .strip_prefix("pub(crate) ")
        .or_else(|| decl.strip_prefix("pub "))
        .unwrap_or(decl);
    let (field, _) = decl.split_once(':')?;
    let field = field.trim();
    let valid = !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(field)
}

fn normalise(name: &str) -> String {
    name.replace('-', "_")
}
