//! Metric sinks: where per-iteration scalars and preview images go

use crate::error::SinkError;
use image::DynamicImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// One logging call: named scalars and images at a training step.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub step: usize,
    pub scalars: BTreeMap<String, f64>,
    pub images: BTreeMap<String, DynamicImage>,
}

impl Record {
    pub fn new(step: usize) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    pub fn scalar(mut self, name: impl Into<String>, value: impl Into<f64>) -> Self {
        self.scalars.insert(name.into(), value.into());
        self
    }

    pub fn image(mut self, name: impl Into<String>, image: impl Into<DynamicImage>) -> Self {
        self.images.insert(name.into(), image.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.scalars.get(name).copied()
    }
}

/// Destination for training records.
pub trait MetricsSink {
    fn log(&mut self, record: &Record) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Emits records as `tracing` events.
#[derive(Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn log(&mut self, record: &Record) -> Result<(), SinkError> {
        let scalars: Vec<String> = record
            .scalars
            .iter()
            .map(|(k, v)| format!("{k}={v:.5}"))
            .collect();
        info!(step = record.step, "{}", scalars.join(" "));
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    step: usize,
    scalars: &'a BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    media: BTreeMap<&'a str, String>,
}

/// Appends scalars to `metrics.jsonl` and writes images under `media/`.
pub struct FileSink {
    root: PathBuf,
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(root: impl AsRef<Path>) -> Result<Self, SinkError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("media"))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(root.join("metrics.jsonl"))?;
        Ok(Self {
            root,
            writer: BufWriter::new(file),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl MetricsSink for FileSink {
    fn log(&mut self, record: &Record) -> Result<(), SinkError> {
        let mut media = BTreeMap::new();
        for (name, image) in &record.images {
            let relative = format!("media/{}_{:06}.png", name, record.step);
            image.to_rgb8().save(self.root.join(&relative))?;
            media.insert(name.as_str(), relative);
        }
        let line = JsonLine {
            step: record.step,
            scalars: &record.scalars,
            media,
        };
        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Forwards every record to each inner sink; the first failure wins.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl MetricsSink for FanoutSink {
    fn log(&mut self, record: &Record) -> Result<(), SinkError> {
        for sink in &mut self.sinks {
            sink.log(record)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub records: Vec<Record>,
}

impl MetricsSink for MemorySink {
    fn log(&mut self, record: &Record) -> Result<(), SinkError> {
        self.records.push(record.clone());
        Ok(())
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for Box<S> {
    fn log(&mut self, record: &Record) -> Result<(), SinkError> {
        (**self).log(record)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_file_sink_writes_lines_and_media() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(dir.path()).unwrap();
        sink.log(&Record::new(0).scalar("train_psnr", 12.5f32)).unwrap();
        let record = Record::new(100)
            .scalar("val_psnr", 20.0f32)
            .image("rgb", RgbImage::from_pixel(2, 2, Rgb([255, 0, 0])));
        sink.log(&record).unwrap();
        sink.flush().unwrap();

        let text = fs::read_to_string(dir.path().join("metrics.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["scalars"]["train_psnr"], 12.5);
        assert_eq!(lines[1]["media"]["rgb"], "media/rgb_000100.png");
        assert!(dir.path().join("media/rgb_000100.png").exists());
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let mut fanout = FanoutSink::new().with(TracingSink).with(MemorySink::default());
        fanout.log(&Record::new(3).scalar("lr", 0.1f32)).unwrap();
        assert_eq!(fanout.sinks.len(), 2);
    }
}
