//! Text rendering of batch outcomes.

use notepress_core::BatchResult;

pub fn render(result: &BatchResult) -> String {
    let mut out = String::new();

    for note in &result.emitted {
        let mark = if note.changed || result.dry_run { "+" } else { "=" };
        out.push_str(&format!("  {} {} -> {}\n", mark, note.source, note.target.display()));
        for unresolved in &note.unresolved {
            out.push_str(&format!("      warning: {}\n", unresolved));
        }
    }
    for note in &result.removed {
        let mut extra = format!("{} asset(s)", note.assets_removed);
        if note.flag_cleared {
            extra.push_str(", publish flag cleared");
        }
        out.push_str(&format!("  - {} ({}) [{}]\n", note.source, note.target.display(), extra));
    }
    for note in &result.skipped {
        out.push_str(&format!("  . {}: {}\n", note.source, note.reason.describe()));
    }
    for note in &result.failed {
        out.push_str(&format!("  ! {}: [{}] {}\n", note.source, note.error.kind(), note.error));
    }

    let mut summary = format!(
        "{} emitted, {} removed, {} skipped, {} failed",
        result.emitted.len(),
        result.removed.len(),
        result.skipped.len(),
        result.failed.len()
    );
    let unresolved = result.unresolved_count();
    if unresolved > 0 {
        summary.push_str(&format!(", {} unresolved image(s)", unresolved));
    }
    if result.dry_run {
        summary.push_str(" (dry run)");
    }
    out.push_str(&summary);
    out.push('\n');
    out
}
