//! Job kinds and the requests submitted to a [`JobClient`](crate::client::JobClient).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::GPU_QUEUE;

/// The GPU-backed job kinds the pipeline dispatches.
///
/// Each kind maps to a remote task name on the `gpu` lane, a display label
/// used in logs and checkpoints, and a short lock name.
///
/// # Examples
///
/// ```
/// use synde_gpu::JobKind;
///
/// let kind: JobKind = "clean_ec".parse().unwrap();
/// assert_eq!(kind, JobKind::CleanEc);
/// assert_eq!(kind.task_name(), "home.tasks.run_clean_ec_job");
/// assert_eq!(kind.label(), "CLEAN_EC");
/// assert_eq!(kind.queue(), "gpu");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Structure prediction.
    Esmfold,
    /// Enzyme Commission number classification.
    CleanEc,
    /// Turnover number (kcat) prediction.
    DeepEnzyme,
    /// Melting temperature prediction.
    Temberture,
    /// Query parameter extraction with a language model.
    FlanExtractor,
    /// Binding pocket detection.
    Fpocket,
}

impl JobKind {
    /// Every job kind, in dispatch-table order.
    pub const ALL: [JobKind; 6] = [
        JobKind::Esmfold,
        JobKind::CleanEc,
        JobKind::DeepEnzyme,
        JobKind::Temberture,
        JobKind::FlanExtractor,
        JobKind::Fpocket,
    ];

    /// Kinds that hold an exclusive accelerator while running.
    pub const ACCELERATOR_BOUND: [JobKind; 4] = [
        JobKind::Esmfold,
        JobKind::CleanEc,
        JobKind::DeepEnzyme,
        JobKind::Temberture,
    ];

    /// Remote task name the worker pool registers.
    pub fn task_name(&self) -> &'static str {
        match self {
            Self::Esmfold => "home.tasks.run_esmfold_job",
            Self::CleanEc => "home.tasks.run_clean_ec_job",
            Self::DeepEnzyme => "home.tasks.run_deepenzyme_kcat_job",
            Self::Temberture => "home.tasks.run_temperture_job",
            Self::FlanExtractor => "home.tasks.run_flan_extractor",
            Self::Fpocket => "home.tasks.run_fpocket_job",
        }
    }

    /// Human-readable label for logs and checkpoint tags.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Esmfold => "ESMFold",
            Self::CleanEc => "CLEAN_EC",
            Self::DeepEnzyme => "DeepEnzyme",
            Self::Temberture => "TemBERTure",
            Self::FlanExtractor => "FLAN_Extractor",
            Self::Fpocket => "Fpocket",
        }
    }

    /// Short name used for GPU lane locks and configuration keys.
    pub fn lock_name(&self) -> &'static str {
        match self {
            Self::Esmfold => "esmfold",
            Self::CleanEc => "clean_ec",
            Self::DeepEnzyme => "deepenzyme",
            Self::Temberture => "temberture",
            Self::FlanExtractor => "flan_extractor",
            Self::Fpocket => "fpocket",
        }
    }

    pub fn queue(&self) -> &'static str {
        GPU_QUEUE
    }

    /// Poll interval override for kinds that finish quickly.
    pub fn poll_interval_override(&self) -> Option<Duration> {
        match self {
            Self::FlanExtractor => Some(Duration::from_secs(2)),
            _ => None,
        }
    }

    /// Looks up a kind by its remote task name.
    pub fn from_task_name(task_name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.task_name() == task_name)
    }

    /// Builds a request for this kind.
    pub fn request(&self, args: JobArgs) -> JobRequest {
        JobRequest {
            name: self.task_name().to_string(),
            queue: self.queue().to_string(),
            args,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.lock_name())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.lock_name() == wanted || kind.label().to_ascii_lowercase() == wanted)
            .ok_or_else(|| format!("unknown job kind: {s}"))
    }
}

/// Positional and keyword arguments for a remote job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobArgs {
    #[serde(default)]
    pub positional: Vec<Value>,
    #[serde(default)]
    pub keyword: Map<String, Value>,
}

impl JobArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Sets a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    /// Arguments for [`JobKind::Esmfold`].
    pub fn esmfold(job_id: &str, sequence: &str) -> Self {
        Self::new().arg(job_id).arg(sequence)
    }

    /// Arguments for [`JobKind::CleanEc`].
    pub fn clean_ec(sequence: &str, seq_name: Option<&str>) -> Self {
        Self::new()
            .arg(sequence)
            .kwarg("seq_name", seq_name.unwrap_or("Input_Seq"))
    }

    /// Arguments for [`JobKind::DeepEnzyme`].
    pub fn deepenzyme(sequence: &str, pdb_path: &str, smiles: &str) -> Self {
        Self::new().arg(sequence).arg(pdb_path).arg(smiles)
    }

    /// Arguments for [`JobKind::Temberture`].
    pub fn temberture(sequence: &str) -> Self {
        Self::new().arg(sequence)
    }

    /// Arguments for [`JobKind::FlanExtractor`].
    pub fn flan_extractor(query: &str) -> Self {
        Self::new().arg(query)
    }

    /// Arguments for [`JobKind::Fpocket`].
    pub fn fpocket(pdb_path: &str, pdb_data: &str, output_dir: &str, num_pockets: u32) -> Self {
        Self::new()
            .arg(pdb_path)
            .arg(pdb_data)
            .arg(output_dir)
            .kwarg("num_pockets", num_pockets)
    }
}

/// One unit of work addressed to a named task on a named lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Remote task name.
    pub name: String,
    /// Lane the work must run on.
    pub queue: String,
    pub args: JobArgs,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, queue: impl Into<String>, args: JobArgs) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            args,
        }
    }
}
