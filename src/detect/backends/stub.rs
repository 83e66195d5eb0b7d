use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// One scripted inference outcome.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Detections(Vec<Detection>),
    Fail(String),
}

/// Stub backend for testing and `stub://` runs.
///
/// Each `infer` call pops the next scripted step. Once the script is
/// exhausted the backend returns no detections, or repeats the last batch
/// when built with `repeating`.
pub struct StubBackend {
    script: VecDeque<ScriptStep>,
    repeat: Option<Vec<Detection>>,
    class_names: Vec<String>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            repeat: None,
            class_names: Vec::new(),
            calls: 0,
        }
    }

    /// Return the same detections on every call.
    pub fn repeating(detections: Vec<Detection>) -> Self {
        let mut backend = Self::new();
        backend.class_names = collect_names(&detections);
        backend.repeat = Some(detections);
        backend
    }

    /// Play the given steps in order, then fall back to empty results.
    pub fn scripted(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        let mut backend = Self::new();
        backend.script = steps.into_iter().collect();
        let mut names = Vec::new();
        for step in &backend.script {
            if let ScriptStep::Detections(batch) = step {
                for name in collect_names(batch) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        backend.class_names = names;
        backend
    }

    /// Parse `LABEL:CONF` entries into a repeating stub that reports each one
    /// at `bbox`. No entries gives a stub that never detects anything.
    pub fn from_entries<S: AsRef<str>>(entries: &[S], bbox: BoundingBox) -> Result<Self> {
        let mut detections = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.as_ref();
            let (label, conf) = entry
                .rsplit_once(':')
                .filter(|(label, _)| !label.trim().is_empty())
                .ok_or_else(|| anyhow!("expected LABEL:CONF, got '{}'", entry))?;
            let confidence: f32 = conf
                .trim()
                .parse()
                .map_err(|_| anyhow!("invalid confidence in '{}'", entry))?;
            detections.push(Detection::new(label.trim(), confidence, bbox));
        }
        if detections.is_empty() {
            Ok(Self::new())
        } else {
            Ok(Self::repeating(detections))
        }
    }

    pub fn with_class_names(mut self, names: Vec<String>) -> Self {
        self.class_names = names;
        self
    }

    /// Number of `infer` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(ScriptStep::Detections(batch)) => Ok(batch),
            Some(ScriptStep::Fail(reason)) => Err(anyhow!(
                "stub inference failed on frame {}: {}",
                frame.index,
                reason
            )),
            None => Ok(self.repeat.clone().unwrap_or_default()),
        }
    }
}

fn collect_names(detections: &[Detection]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for detection in detections {
        if !names.contains(&detection.class_label) {
            names.push(detection.class_label.clone());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car() -> Detection {
        Detection::new("car", 0.8, BoundingBox::new(1.0, 1.0, 5.0, 5.0))
    }

    #[test]
    fn stub_backend_plays_script_then_goes_quiet() {
        let frame = Frame::filled(8, 8, [0, 0, 0], 1);
        let mut backend = StubBackend::scripted(vec![
            ScriptStep::Detections(vec![car()]),
            ScriptStep::Fail("model crashed".into()),
        ]);
        assert_eq!(backend.class_names(), ["car".to_string()]);

        assert_eq!(backend.infer(&frame).unwrap(), vec![car()]);
        let err = backend.infer(&frame).unwrap_err();
        assert!(err.to_string().contains("model crashed"));
        assert!(backend.infer(&frame).unwrap().is_empty());
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn repeating_stub_returns_same_batch() {
        let frame = Frame::filled(8, 8, [0, 0, 0], 1);
        let mut backend = StubBackend::repeating(vec![car()]);
        for _ in 0..3 {
            assert_eq!(backend.infer(&frame).unwrap(), vec![car()]);
        }
    }

    #[test]
    fn entries_become_a_repeating_stub() {
        let frame = Frame::filled(8, 8, [0, 0, 0], 1);
        let bbox = BoundingBox::new(2.0, 2.0, 6.0, 6.0);
        let mut backend =
            StubBackend::from_entries(&["car:0.8", "traffic:light:0.4"], bbox).unwrap();
        assert_eq!(
            backend.class_names(),
            ["car".to_string(), "traffic:light".to_string()]
        );
        for _ in 0..2 {
            let batch = backend.infer(&frame).unwrap();
            assert_eq!(batch.len(), 2);
            assert_eq!(batch[0], Detection::new("car", 0.8, bbox));
            assert_eq!(batch[1].class_label, "traffic:light");
        }

        let mut quiet = StubBackend::from_entries::<&str>(&[], bbox).unwrap();
        assert!(quiet.infer(&frame).unwrap().is_empty());
    }

    #[test]
    fn malformed_entries_are_rejected() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        for entry in ["car", ":0.5", "car:high"] {
            let err = StubBackend::from_entries(&[entry], bbox).err().unwrap();
            assert!(err.to_string().contains(entry), "{entry}");
        }
    }
}
