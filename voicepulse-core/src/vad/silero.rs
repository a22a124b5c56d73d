//! Silero VAD speech-probability model over ONNX Runtime.
//!
//! Wraps the Silero VAD ONNX export (<https://github.com/snakers4/silero-vad>).
//! Both recurrent interfaces are handled:
//!
//! | Version | State inputs        | State outputs     |
//! |---------|---------------------|-------------------|
//! | v3/v4   | `h`, `c` `[2,1,64]` | `hn`, `cn`        |
//! | v5      | `state` `[2,1,128]` | `stateN`          |
//!
//! Every version takes `input` `[1, 512]` f32 and (optionally) `sr` `[1]` i64
//! and produces `output` `[1, 1]`.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::{info, warn};

use super::model::{SpeechProbabilityModel, DEFAULT_WINDOW, MODEL_SAMPLE_RATE};
use crate::error::{PulseError, Result};

const LSTM_STATE_LEN: usize = 2 * 64;
const GRU_STATE_LEN: usize = 2 * 128;

/// Environment override for the models directory.
const MODELS_DIR_ENV: &str = "VOICEPULSE_MODELS_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recurrence {
    Lstm,
    Gru,
    None,
}

/// Names of the tensors this particular export uses.
#[derive(Debug, Default)]
struct TensorNames {
    input: String,
    output: String,
    sr: Option<String>,
    h: Option<String>,
    c: Option<String>,
    hn: Option<String>,
    cn: Option<String>,
    state: Option<String>,
    state_out: Option<String>,
}

pub struct SileroVad {
    session: Session,
    names: TensorNames,
    recurrence: Recurrence,
    h: Vec<f32>,
    c: Vec<f32>,
    state: Vec<f32>,
}

fn onnx_err(e: impl std::fmt::Display) -> PulseError {
    PulseError::OnnxSession(e.to_string())
}

impl SileroVad {
    /// Load the Silero model from `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PulseError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(onnx_err)?
            .commit_from_file(path)
            .map_err(onnx_err)?;

        let inputs: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let outputs: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();

        let names = TensorNames {
            input: find_tensor(&inputs, &["input", "audio", "x"])
                .or_else(|| inputs.first().cloned())
                .ok_or_else(|| onnx_err("Silero model has no inputs"))?,
            output: find_tensor(&outputs, &["output", "speech_prob", "prob"])
                .or_else(|| outputs.first().cloned())
                .ok_or_else(|| onnx_err("Silero model has no outputs"))?,
            sr: find_tensor(&inputs, &["sr", "sample_rate"]),
            h: find_tensor(&inputs, &["h", "state_h"]),
            c: find_tensor(&inputs, &["c", "state_c"]),
            hn: find_tensor(&outputs, &["hn", "state_hn", "h_out"]),
            cn: find_tensor(&outputs, &["cn", "state_cn", "c_out"]),
            state: find_tensor(&inputs, &["state", "h_0", "hidden"]),
            state_out: find_tensor(&outputs, &["stateN", "state_out", "hn_out"]),
        };

        let recurrence = match &names {
            TensorNames {
                h: Some(_),
                c: Some(_),
                hn: Some(_),
                cn: Some(_),
                ..
            } => Recurrence::Lstm,
            TensorNames { state: Some(_), .. } => Recurrence::Gru,
            _ => Recurrence::None,
        };

        info!(
            path = %path.display(),
            inputs = ?inputs,
            outputs = ?outputs,
            recurrence = ?recurrence,
            "silero VAD loaded"
        );

        Ok(Self {
            session,
            names,
            recurrence,
            h: vec![0.0; LSTM_STATE_LEN],
            c: vec![0.0; LSTM_STATE_LEN],
            state: vec![0.0; GRU_STATE_LEN],
        })
    }

    /// `$VOICEPULSE_MODELS_DIR/silero_vad.onnx`, else `./models/silero_vad.onnx`.
    pub fn default_model_path() -> PathBuf {
        std::env::var_os(MODELS_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("models"))
            .join("silero_vad.onnx")
    }

    fn state_tensor(values: &[f32], width: usize) -> Result<SessionInputValue<'static>> {
        let arr = Array3::<f32>::from_shape_vec((2, 1, width), values.to_vec()).map_err(onnx_err)?;
        let value = Value::from_array(arr).map_err(|e: ort::Error| onnx_err(e))?;
        Ok(value.into())
    }
}

fn find_tensor(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

impl SpeechProbabilityModel for SileroVad {
    fn window_size(&self) -> usize {
        DEFAULT_WINDOW
    }

    fn predict(&mut self, window: &[f32]) -> Result<f32> {
        let audio = Array2::<f32>::from_shape_vec((1, window.len()), window.to_vec())
            .map_err(onnx_err)?;
        let audio = Value::from_array(audio).map_err(|e: ort::Error| onnx_err(e))?;

        let mut feeds: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.names.input.clone(), audio.into())];

        if let Some(sr) = &self.names.sr {
            let rate = Value::from_array(Array1::<i64>::from_elem(1, MODEL_SAMPLE_RATE as i64))
                .map_err(|e: ort::Error| onnx_err(e))?;
            feeds.push((sr.clone(), rate.into()));
        }

        match self.recurrence {
            Recurrence::Lstm => {
                if let (Some(h), Some(c)) = (&self.names.h, &self.names.c) {
                    feeds.push((h.clone(), Self::state_tensor(&self.h, 64)?));
                    feeds.push((c.clone(), Self::state_tensor(&self.c, 64)?));
                }
            }
            Recurrence::Gru => {
                if let Some(state) = &self.names.state {
                    feeds.push((state.clone(), Self::state_tensor(&self.state, 128)?));
                }
            }
            Recurrence::None => {}
        }

        let outputs = self.session.run(feeds).map_err(onnx_err)?;

        let prob = {
            let prob_output = outputs
                .get(self.names.output.as_str())
                .unwrap_or(&outputs[0]);
            let (_, data) = prob_output.try_extract_tensor::<f32>().map_err(onnx_err)?;
            data.first().copied().unwrap_or(0.0)
        };

        match self.recurrence {
            Recurrence::Lstm => {
                let hn = self.names.hn.as_deref().and_then(|n| outputs.get(n));
                let cn = self.names.cn.as_deref().and_then(|n| outputs.get(n));
                if let (Some(hn), Some(cn)) = (hn, cn) {
                    let (_, hn) = hn.try_extract_tensor::<f32>().map_err(onnx_err)?;
                    let (_, cn) = cn.try_extract_tensor::<f32>().map_err(onnx_err)?;
                    self.h = hn.to_vec();
                    self.c = cn.to_vec();
                } else {
                    warn!("silero LSTM state outputs missing; continuing stateless");
                    self.recurrence = Recurrence::None;
                }
            }
            Recurrence::Gru => {
                match self.names.state_out.as_deref().and_then(|n| outputs.get(n)) {
                    Some(next) => {
                        let (_, next) = next.try_extract_tensor::<f32>().map_err(onnx_err)?;
                        self.state = next.to_vec();
                    }
                    None => {
                        warn!("silero GRU state output missing; continuing stateless");
                        self.recurrence = Recurrence::None;
                    }
                }
            }
            Recurrence::None => {}
        }

        Ok(prob)
    }

    fn reset(&mut self) {
        self.h.iter_mut().for_each(|v| *v = 0.0);
        self.c.iter_mut().for_each(|v| *v = 0.0);
        self.state.iter_mut().for_each(|v| *v = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_file_is_reported() {
        let err = SileroVad::new("/nonexistent/silero_vad.onnx")
            .err()
            .expect("loading a missing model must fail");
        assert!(matches!(err, PulseError::ModelNotFound { .. }));
    }

    #[test]
    fn tensor_names_match_case_insensitively() {
        let names = vec!["Input".to_string(), "SR".to_string()];
        assert_eq!(find_tensor(&names, &["input"]), Some("Input".into()));
        assert_eq!(find_tensor(&names, &["sr", "sample_rate"]), Some("SR".into()));
        assert_eq!(find_tensor(&names, &["state"]), None);
    }
}
