use filters::{FilterKind, OutputFormat};
use ipc::ResourceNames;
use std::ffi::OsString;
use std::path::PathBuf;

/// Subcommand under which the pipeline binary runs as a worker.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Everything a worker process needs, passed on its command line.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub slot: usize,
    pub names: ResourceNames,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub filters: Vec<FilterKind>,
    pub format: OutputFormat,
}

impl WorkerSettings {
    /// Command line that reproduces these settings in a fresh process.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            WORKER_SUBCOMMAND.into(),
            "--slot".into(),
            self.slot.to_string().into(),
            "--ipc-prefix".into(),
            self.names.prefix.clone().into(),
            "--input-dir".into(),
            self.input_dir.clone().into(),
            "--output-dir".into(),
            self.output_dir.clone().into(),
            "--filters".into(),
            FilterKind::join_names(&self.filters).into(),
            "--format".into(),
            self.format.name().into(),
        ];
        if let OutputFormat::Jpeg { quality } = self.format {
            args.push("--jpeg-quality".into());
            args.push(quality.to_string().into());
        }
        args
    }

    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            slot: 0,
            names: ResourceNames::default(),
            input_dir: PathBuf::from("images"),
            output_dir: PathBuf::from("output"),
            filters: FilterKind::ALL.to_vec(),
            format: OutputFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_args_carries_every_setting() {
        let mut settings = WorkerSettings::test_default();
        settings.slot = 3;
        settings.names = ResourceNames::with_prefix("/run7").unwrap();

        let args: Vec<String> = settings
            .to_args()
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                "worker",
                "--slot",
                "3",
                "--ipc-prefix",
                "/run7",
                "--input-dir",
                "images",
                "--output-dir",
                "output",
                "--filters",
                "grayscale,blur,resize",
                "--format",
                "jpeg",
                "--jpeg-quality",
                "90",
            ]
        );
    }

    #[test]
    fn test_lossless_format_has_no_quality_flag() {
        let mut settings = WorkerSettings::test_default();
        settings.format = OutputFormat::Png;
        let args = settings.to_args();
        assert!(!args.iter().any(|a| a == "--jpeg-quality"));
        assert!(args.iter().any(|a| a == "png"));
    }
}
