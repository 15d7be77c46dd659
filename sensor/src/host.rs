use std::{net::SocketAddr, sync::Arc, time::Instant};

use anyhow::Context;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::info;

use envmon_common::{CalibrationConfig, ReadingSnapshot, SensorSample};

#[derive(Clone)]
struct AppState {
    sensors: Arc<Mutex<SimulatedSuite>>,
    calibration: Arc<CalibrationConfig>,
    started: Instant,
}

/// Stand-in for the hardware sensor suite on the ESP target.
///
/// Readings drift deterministically with each request, and the second probe
/// drops out every fifth read so the null path stays observable.
#[derive(Debug, Default)]
struct SimulatedSuite {
    tick: u64,
}

impl SimulatedSuite {
    fn read(&mut self) -> SensorSample {
        self.tick = self.tick.saturating_add(1);
        let tick = self.tick;

        // Hardware integration point:
        // replace these simulated readings with the DS18B20 + ADC suite on the ESP target.
        let temp2_c = if tick % 5 == 0 {
            None
        } else {
            Some(20.5 + (tick % 6) as f32 * 0.3)
        };

        SensorSample {
            temp1_c: Some(21.0 + (tick % 8) as f32 * 0.2),
            temp2_c,
            mq1_raw: 900 + ((tick * 37) % 400) as u16,
            mq2_raw: 200 + ((tick * 17) % 150) as u16,
            humidity1_raw: 2600 - ((tick * 29) % 500) as u16,
            humidity2_raw: 2400 - ((tick * 41) % 500) as u16,
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let calibration = CalibrationConfig::default();
    calibration
        .validate()
        .context("invalid analog calibration")?;

    let state = AppState {
        sensors: Arc::new(Mutex::new(SimulatedSuite::default())),
        calibration: Arc::new(calibration),
        started: Instant::now(),
    };

    let app = Router::new()
        .route("/data", get(handle_get_data))
        .with_state(state);

    let port = std::env::var("SENSOR_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse().unwrap();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind sensor server at {addr}"))?;

    info!("snapshot endpoint listening on http://{addr}/data");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_get_data(State(state): State<AppState>) -> impl IntoResponse {
    let sample = state.sensors.lock().await.read();
    let timestamp_ms = state.started.elapsed().as_millis() as u64;

    Json(ReadingSnapshot::build(
        &sample,
        &state.calibration,
        timestamp_ms,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_raws_stay_within_adc_range() {
        let mut suite = SimulatedSuite::default();

        for _ in 0..64 {
            let sample = suite.read();
            for raw in [
                sample.mq1_raw,
                sample.mq2_raw,
                sample.humidity1_raw,
                sample.humidity2_raw,
            ] {
                assert!(raw <= 4095, "raw {raw} outside ADC range");
            }
        }
    }

    #[test]
    fn second_probe_drops_out_periodically() {
        let mut suite = SimulatedSuite::default();

        let mut absences = 0;
        for _ in 0..10 {
            if suite.read().temp2_c.is_none() {
                absences += 1;
            }
        }

        assert_eq!(absences, 2);
    }
}
