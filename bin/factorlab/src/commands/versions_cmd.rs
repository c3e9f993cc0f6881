use factorlab_storage::{DiffSegment, VersionMeta, VersionMetaUpdate};

use super::context::{print_json, CliContext};

pub async fn list(ctx: &CliContext, comment_id: &str, variant_index: usize, json: bool) -> anyhow::Result<()> {
    let service = ctx.service(None).await?;
    let versions = service.list_versions(comment_id, variant_index)?;
    if json {
        return print_json(&versions);
    }

    println!();
    if versions.is_empty() {
        println!("(No versions for comment {} variant {})", comment_id, variant_index);
        println!();
        return Ok(());
    }
    println!("📚 Versions of comment {} variant {} (newest first)", comment_id, variant_index);
    for entry in &versions {
        let v = &entry.version;
        println!(
            "  #{:<5} seq {:<4} {} {}{}{}",
            v.id,
            v.sequence,
            entry.created_at_local,
            if v.is_important { "⭐ " } else { "" },
            v.note.as_deref().unwrap_or(""),
            if v.tags.is_empty() { String::new() } else { format!(" [{}]", v.tags.join(", ")) }
        );
    }
    println!();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn create(
    ctx: &CliContext,
    comment_id: &str,
    variant_index: usize,
    note: Option<String>,
    tags: Vec<String>,
    important: bool,
    created_by: Option<String>,
) -> anyhow::Result<()> {
    let service = ctx.service(None).await?;
    let meta = VersionMeta {
        note,
        tags,
        is_important: important,
        created_by,
    };
    let (version, pruned) = service.create_version(comment_id, variant_index, None, &meta)?;
    println!("✓ Created version #{} (seq {})", version.id, version.sequence);
    if pruned > 0 {
        println!("  pruned {} old version(s)", pruned);
    }
    Ok(())
}

pub async fn show(ctx: &CliContext, id: i64, json: bool) -> anyhow::Result<()> {
    let service = ctx.service(None).await?;
    let v = service.get_version(id)?;
    if json {
        return print_json(&v);
    }
    println!();
    println!("Version #{} (comment {}, variant {}, seq {})", v.id, v.comment_id, v.variant_index, v.sequence);
    println!("  Created:   {} by {}", service.display_time(&v), v.created_by.as_deref().unwrap_or("-"));
    println!("  Important: {}", v.is_important);
    if let Some(note) = &v.note {
        println!("  Note:      {}", note);
    }
    if !v.tags.is_empty() {
        println!("  Tags:      {}", v.tags.join(", "));
    }
    println!();
    println!("Description:\n{}\n", v.snapshot.description);
    println!("Pseudocode:\n{}\n", v.snapshot.pseudocode);
    println!("Code:\n{}", v.snapshot.code);
    Ok(())
}

pub async fn update(
    ctx: &CliContext,
    id: i64,
    note: Option<String>,
    tags: Option<Vec<String>>,
    important: Option<bool>,
) -> anyhow::Result<()> {
    let update = VersionMetaUpdate {
        note,
        tags,
        is_important: important,
    };
    if update.is_empty() {
        anyhow::bail!("Nothing to update: pass --note, --tags or --important");
    }
    let service = ctx.service(None).await?;
    let v = service.update_version_meta(id, &update)?;
    println!("✓ Updated version #{}", v.id);
    Ok(())
}

pub async fn delete(ctx: &CliContext, id: i64) -> anyhow::Result<()> {
    let service = ctx.service(None).await?;
    service.delete_version(id)?;
    println!("✓ Deleted version #{}", id);
    Ok(())
}

fn print_segments(title: &str, segments: &[DiffSegment]) {
    println!("--- {}", title);
    for seg in segments {
        let prefix = if seg.added {
            "+"
        } else if seg.removed {
            "-"
        } else {
            " "
        };
        for line in seg.value.lines() {
            println!("{}{}", prefix, line);
        }
    }
    println!();
}

pub async fn diff(ctx: &CliContext, old_id: i64, new_id: i64, json: bool) -> anyhow::Result<()> {
    let service = ctx.service(None).await?;
    let d = service.diff_versions(old_id, new_id)?;
    if json {
        return print_json(&d);
    }
    println!();
    println!("#{} → #{}", d.old_version.id, d.new_version.id);
    println!();
    print_segments("code", &d.code_diff);
    print_segments("pseudocode", &d.pseudocode_diff);
    Ok(())
}

pub async fn restore(ctx: &CliContext, id: i64, created_by: Option<String>, json: bool) -> anyhow::Result<()> {
    let service = ctx.service(None).await?;
    let out = service.restore_version(id, created_by)?;
    if json {
        return print_json(&out);
    }
    println!(
        "✓ Restored version #{} as #{} (variant {} \"{}\")",
        id, out.new_version.id, out.new_version.variant_index, out.updated_variant.name
    );
    Ok(())
}

pub async fn cleanup(ctx: &CliContext, comment_id: &str, variant_index: usize, keep: Option<usize>) -> anyhow::Result<()> {
    let service = ctx.service(None).await?;
    let deleted = service.cleanup_versions(comment_id, variant_index, keep)?;
    println!("✓ Deleted {} version(s)", deleted);
    Ok(())
}
