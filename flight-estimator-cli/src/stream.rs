use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use anyhow::Result;
use flight_estimator_core::{
    Command, EnrichedTelemetry, EstimatorConfig, FlightSummary, TelemetryPipeline,
    TelemetrySample,
};
use tokio::{sync::mpsc, task::JoinHandle};

const CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub enum PipelineInput {
    Sample(TelemetrySample),
    Command(Command, u64),
}

/// Moves the pipeline into its own task. It is the only writer; everything
/// else talks to it through the channels. The task ends when the input side
/// is dropped and yields the final summary.
pub fn spawn_pipeline(
    config: EstimatorConfig,
) -> (
    mpsc::Sender<PipelineInput>,
    mpsc::Receiver<EnrichedTelemetry>,
    JoinHandle<FlightSummary>,
) {
    let (input_tx, mut input_rx) = mpsc::channel::<PipelineInput>(CHANNEL_SIZE);
    let (output_tx, output_rx) = mpsc::channel::<EnrichedTelemetry>(CHANNEL_SIZE);

    let handle = tokio::spawn(async move {
        let mut pipeline = TelemetryPipeline::new(config);
        while let Some(input) = input_rx.recv().await {
            match input {
                PipelineInput::Sample(sample) => {
                    let record = pipeline.process(&sample);
                    if output_tx.send(record).await.is_err() {
                        log::warn!("output closed, stopping pipeline");
                        break;
                    }
                }
                PipelineInput::Command(command, timestamp_us) => {
                    match pipeline.command(command, timestamp_us) {
                        Ok(_) => log::info!("{:?} accepted at {}us", command, timestamp_us),
                        Err(e) => log::warn!("{:?} rejected: {:?}", command, e),
                    }
                }
            }
        }
        pipeline.summary()
    });

    (input_tx, output_rx, handle)
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

/// Streams `samples` through a pipeline task, arming once the first sample at
/// or after `arm_at` arrives, and writes every record as a json line.
pub async fn run(
    samples: Vec<TelemetrySample>,
    arm_at: Option<u64>,
    config: EstimatorConfig,
    output: Option<&Path>,
) -> Result<FlightSummary> {
    let mut writer = open_output(output)?;
    let (input_tx, mut output_rx, pipeline) = spawn_pipeline(config);

    let feeder = tokio::spawn(async move {
        let mut arm_at = arm_at;
        for sample in samples {
            if arm_at.is_some_and(|at| sample.timestamp_us >= at) {
                arm_at = None;
                let command = PipelineInput::Command(Command::Arm, sample.timestamp_us);
                if input_tx.send(command).await.is_err() {
                    return;
                }
            }
            if input_tx.send(PipelineInput::Sample(sample)).await.is_err() {
                return;
            }
        }
    });

    let mut records = 0usize;
    while let Some(record) = output_rx.recv().await {
        for event in record.new_events.iter() {
            log::info!(
                "{:?} at {}us ({:?} -> {:?}, confidence {:.2})",
                event.kind,
                event.timestamp_us,
                event.phase_transition.from,
                event.phase_transition.to,
                event.confidence
            );
        }
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
        records += 1;
    }
    writer.flush()?;

    feeder.await?;
    let summary = pipeline.await?;
    log::info!(
        "processed {} samples, {} valid, {} gps failures, {} sensor failures",
        records,
        summary.validation.valid_samples,
        summary.validation.gps_failures,
        summary.validation.sensor_failures
    );
    log::info!("flight summary: {}", serde_json::to_string_pretty(&summary)?);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use flight_estimator_core::{
        FlightPhase,
        sim::{SimConfig, simulate_flight},
    };

    use super::*;

    #[tokio::test]
    async fn simulated_flight_streams_to_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enriched.jsonl");
        let flight = simulate_flight(&SimConfig::default()).unwrap();
        let count = flight.samples.len();

        let summary = run(
            flight.samples,
            Some(1_000_000),
            EstimatorConfig::default(),
            Some(&path),
        )
        .await
        .unwrap();
        assert_eq!(summary.phase, FlightPhase::Landed);
        assert_eq!(summary.validation.total_samples, count as u64);

        let output = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), count);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["phase"], "IDLE");
        assert_eq!(first["sample_count"], 1);
        assert_eq!(first["euler_angles_deg"].as_array().unwrap().len(), 3);
        let last: serde_json::Value = serde_json::from_str(lines[count - 1]).unwrap();
        assert_eq!(last["phase"], "LANDED");

        let events: Vec<String> = lines
            .iter()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
            .flat_map(|record| {
                record["new_events"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|e| e["type"].as_str().unwrap().to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        assert_eq!(events.first().map(String::as_str), Some("ARMED"));
        assert!(events.iter().any(|e| e == "APOGEE_DETECTED"));
        assert_eq!(events.last().map(String::as_str), Some("LANDED"));
    }

    #[tokio::test]
    async fn commands_are_applied_in_order() {
        let (input_tx, mut output_rx, pipeline) = spawn_pipeline(EstimatorConfig::default());
        let flight = simulate_flight(&SimConfig::default()).unwrap();

        input_tx
            .send(PipelineInput::Command(Command::Arm, 0))
            .await
            .unwrap();
        input_tx
            .send(PipelineInput::Sample(flight.samples[0].clone()))
            .await
            .unwrap();
        input_tx
            .send(PipelineInput::Command(Command::Disarm, 50_000))
            .await
            .unwrap();
        input_tx
            .send(PipelineInput::Sample(flight.samples[1].clone()))
            .await
            .unwrap();
        drop(input_tx);

        let first = output_rx.recv().await.unwrap();
        assert_eq!(first.phase, FlightPhase::Armed);
        let second = output_rx.recv().await.unwrap();
        assert_eq!(second.phase, FlightPhase::Idle);
        assert!(output_rx.recv().await.is_none());

        let summary = pipeline.await.unwrap();
        assert_eq!(summary.event_count, 2);
    }
}
