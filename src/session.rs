use serde::{Deserialize, Serialize};
use simple_error::SimpleError;
use std::ops::Range;

use crate::error::SimResult;
use crate::params::TrialParams;
use crate::types::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialTemplate {
    pub use_cs: bool,
    pub cs_onset: usize,
    pub cs_length: usize,
    pub cs_percent: f32,
    pub use_us: bool,
    pub us_onset: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionDefinition {
    pub trials: HashMap<String, TrialTemplate>,
    pub blocks: HashMap<String, Vec<(String, usize)>>,
    pub session: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialDef {
    pub name: String,
    pub use_cs: bool,
    pub cs_onset: usize,
    pub cs_length: usize,
    pub cs_percent: f32,
    pub use_us: bool,
    pub us_onset: usize,
}

impl TrialDef {
    pub fn cs_window(&self) -> Range<usize> {
        self.cs_onset..self.cs_onset + self.cs_length
    }

    pub fn validate(&self, trial_time: usize) -> Result<(), SimpleError> {
        if self.cs_onset + self.cs_length > trial_time {
            return Err(SimpleError::new(format!(
                "trial '{}': cs_onset + cs_length must not exceed trial_time",
                self.name
            )));
        }

        if self.use_us && self.us_onset >= trial_time {
            return Err(SimpleError::new(format!(
                "trial '{}': us_onset must be less than trial_time",
                self.name
            )));
        }

        if !(0.0..=1.0).contains(&self.cs_percent) {
            return Err(SimpleError::new(format!(
                "trial '{}': cs_percent must be in [0, 1]",
                self.name
            )));
        }

        Ok(())
    }

    fn from_template(name: &str, template: &TrialTemplate) -> Self {
        Self {
            name: name.to_string(),
            use_cs: template.use_cs,
            cs_onset: template.cs_onset,
            cs_length: template.cs_length,
            cs_percent: template.cs_percent,
            use_us: template.use_us,
            us_onset: template.us_onset,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialSchedule {
    trials: Vec<TrialDef>,
}

impl TrialSchedule {
    pub fn new(trials: Vec<TrialDef>) -> Self {
        Self { trials }
    }

    pub fn tuning(params: &TrialParams) -> Self {
        let trial = TrialDef {
            name: "tuning".to_string(),
            use_cs: true,
            cs_onset: params.cs_onset,
            cs_length: params.cs_length,
            cs_percent: params.cs_percent,
            use_us: true,
            us_onset: params.us_onset.unwrap_or_else(|| params.cs_offset()),
        };

        Self {
            trials: vec![trial; params.num_total_trials()],
        }
    }

    pub fn from_session(session: &SessionDefinition, trial_time: usize) -> SimResult<Self> {
        Ok(Self {
            trials: session.expand(trial_time)?,
        })
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn get(&self, trial: usize) -> Option<&TrialDef> {
        self.trials.get(trial)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrialDef> {
        self.trials.iter()
    }

    pub fn validate(&self, trial_time: usize) -> SimResult<()> {
        for trial in &self.trials {
            trial.validate(trial_time)?;
        }
        Ok(())
    }
}

impl SessionDefinition {
    pub fn from_yaml(yaml: &str) -> SimResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|err| SimpleError::new(format!("unparseable session definition: {}", err)).into())
    }

    pub fn expand(&self, trial_time: usize) -> SimResult<Vec<TrialDef>> {
        for (name, template) in &self.trials {
            TrialDef::from_template(name, template).validate(trial_time)?;
        }

        let mut result = Vec::new();

        for (block_name, block_reps) in &self.session {
            let block = self.blocks.get(block_name).ok_or_else(|| {
                SimpleError::new(format!("session references unknown block '{}'", block_name))
            })?;

            for _ in 0..*block_reps {
                for (trial_name, trial_reps) in block {
                    let template = self.trials.get(trial_name).ok_or_else(|| {
                        SimpleError::new(format!(
                            "block '{}' references unknown trial '{}'",
                            block_name, trial_name
                        ))
                    })?;

                    let trial = TrialDef::from_template(trial_name, template);
                    result.extend(std::iter::repeat(trial).take(*trial_reps));
                }
            }
        }

        Ok(result)
    }
}
