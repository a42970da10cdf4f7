use crate::core::reference::ReferenceList;
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString};

/// Variable the array lookup assigns the current atlas id to.
const ATLAS_VAR: &str = "atlas_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    /// Affine mask propagation, one array task per atlas template
    MaskPropagation,
    /// Fuses the propagated affine masks
    MaskFusion,
    /// Non-rigid label propagation, one array task per atlas template
    NonrigidPropagation,
    /// Fuses the propagated non-rigid labels
    NonrigidFusion,
}

impl Stage {
    pub fn is_array(&self) -> bool {
        matches!(self, Stage::MaskPropagation | Stage::NonrigidPropagation)
    }

    /// Short tag used in job file and log names.
    pub fn tag(&self) -> &'static str {
        match self {
            Stage::MaskPropagation => "affine_mask",
            Stage::MaskFusion => "mask_labelfusion",
            Stage::NonrigidPropagation => "nonrigid_label",
            Stage::NonrigidFusion => "nonrigid_labelfusion",
        }
    }

    pub fn job_file_name(&self, target_id: &str) -> String {
        format!("{target_id}_{}.sh", self.tag())
    }
}

/// Caller inputs shared by all stages.
#[derive(Debug, Clone, Default)]
pub struct StageParams {
    pub target_dir: PathBuf,
    pub target_id: String,
    pub atlas_dir: PathBuf,
    pub result_dir: PathBuf,
    /// Required by the non-rigid stages
    pub target_mask: Option<PathBuf>,
    /// File listing the atlases to fuse, required by non-rigid fusion
    pub atlas_list: Option<PathBuf>,
}

impl StageParams {
    pub fn template_dir(&self) -> PathBuf {
        self.atlas_dir.join("template")
    }
}

/// A stage command ready to be run locally or written as a job script.
#[derive(Debug, Clone)]
pub struct StageJob {
    pub stage: Stage,
    pub target_id: String,
    /// Present for array stages; sizes the array and drives the lookup
    pub references: Option<ReferenceList>,
    source_line: String,
    lookup_lines: Vec<String>,
    command: String,
}

impl StageJob {
    /// Builds the job, listing `<atlas_dir>/template` for array stages.
    pub fn build(stage: Stage, params: &StageParams, helper_script: &Path) -> Result<Self> {
        let references = if stage.is_array() {
            let refs = ReferenceList::from_dir(&params.template_dir())?;
            if refs.is_empty() {
                return Err(anyhow!(
                    "No templates found in '{}'",
                    params.template_dir().display()
                ));
            }
            Some(refs)
        } else {
            None
        };
        Self::with_references(stage, params, helper_script, references)
    }

    pub fn with_references(
        stage: Stage,
        params: &StageParams,
        helper_script: &Path,
        references: Option<ReferenceList>,
    ) -> Result<Self> {
        if stage.is_array() != references.is_some() {
            return Err(anyhow!(
                "Stage {stage} {} a reference list",
                if stage.is_array() { "requires" } else { "does not take" }
            ));
        }

        let command = stage_command(stage, params)?;
        let lookup_lines = references
            .as_ref()
            .map(|refs| refs.lookup_lines(ATLAS_VAR))
            .unwrap_or_default();

        Ok(Self {
            stage,
            target_id: params.target_id.clone(),
            references,
            source_line: format!("source {} > /dev/null", quote_path(helper_script)),
            lookup_lines,
            command,
        })
    }

    pub fn is_array(&self) -> bool {
        self.references.is_some()
    }

    /// The stage's external tool invocation, without the helper sourcing.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Body lines for a job script.
    pub fn script_lines(&self) -> Vec<String> {
        if self.is_array() {
            let mut lines = vec![self.source_line.clone(), String::new()];
            lines.extend(self.lookup_lines.iter().cloned());
            lines.push(self.command.clone());
            lines
        } else {
            vec![self.command_line()]
        }
    }

    /// The whole job as one shell command string.
    pub fn command_line(&self) -> String {
        if self.is_array() {
            let mut lines = vec![self.source_line.clone()];
            lines.extend(self.lookup_lines.iter().cloned());
            lines.push(self.command.clone());
            lines.join("\n")
        } else {
            format!("{}; {}", self.source_line, self.command)
        }
    }
}

fn stage_command(stage: Stage, params: &StageParams) -> Result<String> {
    let target_dir = quote_path(&params.target_dir);
    let target_id = quote(&params.target_id);
    let atlas_dir = quote_path(&params.atlas_dir);
    let result_dir = quote_path(&params.result_dir);

    let command = match stage {
        Stage::MaskPropagation => format!(
            "mas_masking -T {target_dir} -t {target_id} -A {atlas_dir} -a ${ATLAS_VAR} -r {result_dir}"
        ),
        Stage::MaskFusion => {
            format!("mas_masking_fusion {target_dir} {target_id} {result_dir} {atlas_dir}")
        }
        Stage::NonrigidPropagation => {
            let mask = required(&params.target_mask, stage, "a target mask")?;
            format!(
                "mas_mapping -T {target_dir} -t {target_id} -m {mask} -A {atlas_dir} -a ${ATLAS_VAR} -r {result_dir}"
            )
        }
        Stage::NonrigidFusion => {
            let mask = required(&params.target_mask, stage, "a target mask")?;
            let atlas_list = required(&params.atlas_list, stage, "an atlas list")?;
            format!(
                "mas_fusion -T {target_dir} -t {target_id} -A {atlas_dir} -a {atlas_list} -r {result_dir} -m {mask}"
            )
        }
    };
    Ok(command)
}

fn required(path: &Option<PathBuf>, stage: Stage, what: &str) -> Result<String> {
    path.as_deref()
        .map(quote_path)
        .ok_or_else(|| anyhow!("Stage {stage} requires {what}"))
}

fn quote(s: &str) -> String {
    shell_escape::escape(s.into()).into_owned()
}

pub(crate) fn quote_path(path: &Path) -> String {
    shell_escape::escape(path.to_string_lossy()).into_owned()
}
