use anyhow::Context;
use filters::is_supported_input;
use ipc::MAX_FILENAME;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// List the image files in `input_dir`, sorted by name.
///
/// Names that would not fit a task message are skipped with a warning rather
/// than dispatched truncated. Inputs sharing a stem are kept but warned about,
/// since their outputs land on the same paths.
pub fn scan_jobs(input_dir: &Path) -> anyhow::Result<Vec<String>> {
    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read input directory {}", input_dir.display()))?;

    let mut jobs = Vec::new();
    for entry in entries {
        let entry = entry.context("Failed to read input directory entry")?;
        let path = entry.path();
        if !path.is_file() || !is_supported_input(&path) {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            tracing::warn!(path = %path.display(), "Skipping non UTF-8 file name");
            continue;
        };
        if name.len() > MAX_FILENAME {
            tracing::warn!(file = %name, max = MAX_FILENAME, "Skipping over-long file name");
            continue;
        }
        jobs.push(name);
    }

    jobs.sort();
    for (stem, names) in shared_stems(&jobs) {
        tracing::warn!(
            stem = %stem,
            files = %names.join(", "),
            "Inputs share a stem, their outputs overwrite each other"
        );
    }
    Ok(jobs)
}

/// Stems claimed by more than one input, with the inputs claiming them.
pub fn shared_stems(jobs: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut by_stem: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for job in jobs {
        let stem = Path::new(job)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(job);
        by_stem.entry(stem.to_string()).or_default().push(job.clone());
    }
    by_stem.retain(|_, names| names.len() > 1);
    by_stem
}
