//! Parallel filter invocation over one decoded image.
//!
//! One scoped thread per filter kind, all reading the same buffer. The call
//! returns only after every thread has finished, so the buffer outlives them.

use filters::{FilterError, FilterKind, OutputFormat, PixelBuffer, output_path};
use std::path::{Path, PathBuf};
use std::thread;

#[derive(Debug)]
pub struct FilterOutcome {
    pub kind: FilterKind,
    pub path: PathBuf,
    pub result: Result<(), FilterError>,
}

impl FilterOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Default)]
pub struct FanOutReport {
    pub outcomes: Vec<FilterOutcome>,
}

impl FanOutReport {
    /// A task succeeds only if every filter succeeded.
    pub fn all_succeeded(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(FilterOutcome::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FilterOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }
}

/// Render every filter in `kinds` from `image` into `output_dir`.
///
/// Filters are failure-isolated: an error or panic in one kind is recorded in
/// its outcome and the others still write their files.
pub fn fan_out(
    image: &PixelBuffer,
    input_name: &str,
    kinds: &[FilterKind],
    output_dir: &Path,
    format: OutputFormat,
) -> FanOutReport {
    let outcomes = thread::scope(|s| {
        let pending: Vec<_> = kinds
            .iter()
            .map(|&kind| {
                let path = output_path(output_dir, input_name, kind, format);
                let handle = thread::Builder::new()
                    .name(format!("filter-{kind}"))
                    .spawn_scoped(s, {
                        let path = path.clone();
                        move || kind.render(image, &path, format)
                    });
                (kind, path, handle)
            })
            .collect();

        // Join barrier
        pending
            .into_iter()
            .map(|(kind, path, handle)| {
                let result = match handle {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or(Err(FilterError::Panicked(kind))),
                    Err(e) => {
                        tracing::error!(filter = %kind, error = %e, "Failed to spawn filter thread");
                        Err(FilterError::Output {
                            kind,
                            source: e.into(),
                        })
                    }
                };
                FilterOutcome { kind, path, result }
            })
            .collect()
    });

    FanOutReport { outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filters::decode;
    use tempfile::TempDir;

    fn test_image() -> PixelBuffer {
        let pixels = (0..16 * 12 * 3).map(|i| (i * 7 % 256) as u8).collect();
        PixelBuffer::new(16, 12, 3, pixels).unwrap()
    }

    #[test]
    fn test_all_filters_write_outputs() {
        let dir = TempDir::new().unwrap();
        let image = test_image();

        let report = fan_out(&image, "cat.png", &FilterKind::ALL, dir.path(), OutputFormat::Png);

        assert!(report.all_succeeded());
        assert_eq!(report.outcomes.len(), 3);
        for outcome in &report.outcomes {
            assert!(outcome.path.exists(), "{} missing", outcome.path.display());
        }

        let resized = decode(&dir.path().join("cat_resize.png")).unwrap();
        assert_eq!((resized.width, resized.height), (8, 6));
        let blurred = decode(&dir.path().join("cat_blur.png")).unwrap();
        assert_eq!((blurred.width, blurred.height), (16, 12));
    }

    #[test]
    fn test_one_failing_kind_does_not_abort_others() {
        let dir = TempDir::new().unwrap();
        // A directory where the blur output should go makes that write fail
        std::fs::create_dir(dir.path().join("dog_blur.jpg")).unwrap();

        let report = fan_out(
            &test_image(),
            "dog.jpg",
            &FilterKind::ALL,
            dir.path(),
            OutputFormat::default(),
        );

        assert!(!report.all_succeeded(), "Task must be failed overall");
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.failures().next().unwrap().kind, FilterKind::Blur);
        assert!(dir.path().join("dog_grayscale.jpg").is_file());
        assert!(dir.path().join("dog_resize.jpg").is_file());
    }

    #[test]
    fn test_input_buffer_untouched() {
        let dir = TempDir::new().unwrap();
        let image = test_image();
        let before = image.clone();

        fan_out(&image, "x.png", &FilterKind::ALL, dir.path(), OutputFormat::Bmp);
        assert_eq!(image, before);
    }

    #[test]
    fn test_empty_kind_list_is_not_success() {
        let dir = TempDir::new().unwrap();
        let report = fan_out(&test_image(), "x.png", &[], dir.path(), OutputFormat::Png);
        assert!(!report.all_succeeded());
    }
}
