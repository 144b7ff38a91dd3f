use std::sync::Mutex;
use std::time::Duration;

use actix_web::{get, post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::metadata::HostInfo;
use crate::sampler::CpuSampler;
use crate::stress::{StartOutcome, StressController};

#[derive(Deserialize)]
pub struct StartRequest {
    duration_ms: Option<u64>,
}

#[derive(Serialize)]
struct StartResponse {
    started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    workers: Option<usize>,
}

#[derive(Serialize)]
struct MetricsResponse {
    cpus: Vec<u8>,
    load_average: [f64; 3],
    core_count: usize,
    is_stressing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stress_remaining_ms: Option<u64>,
    instance_id: String,
    availability_zone: String,
}

#[post("/api/stress/start")]
pub async fn start_stress(
    params: web::Json<StartRequest>,
    ctl: web::Data<StressController>,
) -> impl Responder {
    let Some(duration_ms) = params.duration_ms.filter(|d| *d > 0) else {
        return HttpResponse::BadRequest().json(StartResponse {
            started: false,
            reason: Some("duration_ms must be a positive integer"),
            workers: None,
        });
    };

    match ctl.start(Duration::from_millis(duration_ms)) {
        StartOutcome::Started { workers } => HttpResponse::Ok().json(StartResponse {
            started: true,
            reason: None,
            workers: Some(workers),
        }),
        StartOutcome::AlreadyRunning => HttpResponse::Ok().json(StartResponse {
            started: false,
            reason: Some("already running"),
            workers: None,
        }),
    }
}

#[post("/api/stress/stop")]
pub async fn stop_stress(ctl: web::Data<StressController>) -> impl Responder {
    ctl.stop();
    HttpResponse::Ok().json(json!({ "stopped": true }))
}

#[get("/api/metrics")]
pub async fn metrics(
    sampler: web::Data<Mutex<CpuSampler>>,
    ctl: web::Data<StressController>,
    host: web::Data<HostInfo>,
) -> impl Responder {
    let sample = sampler.lock().unwrap().sample();
    let sample = match sample {
        Ok(sample) => sample,
        Err(err) => {
            log::error!("cpu sample failed: {err}");
            return HttpResponse::InternalServerError().json(json!({ "error": "cpu sample failed" }));
        }
    };
    let status = ctl.status();
    HttpResponse::Ok().json(MetricsResponse {
        cpus: sample.per_core_usage,
        load_average: sample.load_average,
        core_count: sample.core_count,
        is_stressing: status.is_stressing,
        stress_remaining_ms: status.remaining.map(|d| d.as_millis() as u64),
        instance_id: host.instance_id.clone(),
        availability_zone: host.availability_zone.clone(),
    })
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

#[get("/")]
pub async fn index() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

// Minimal status page; the real dashboard lives outside this service.
const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>stressd</title></head>
<body>
<h1>stressd</h1>
<p id="host"></p>
<pre id="metrics">loading...</pre>
<button onclick="post('/api/stress/start', {duration_ms: 60000})">Burn for 60s</button>
<button onclick="post('/api/stress/stop')">Stop</button>
<script>
async function post(url, body) {
  await fetch(url, {
    method: 'POST',
    headers: {'Content-Type': 'application/json'},
    body: JSON.stringify(body || {}),
  });
}
async function refresh() {
  const res = await fetch('/api/metrics');
  const m = await res.json();
  document.getElementById('host').textContent = m.instance_id + ' / ' + m.availability_zone;
  document.getElementById('metrics').textContent = JSON.stringify(m, null, 2);
}
setInterval(refresh, 1000);
refresh();
</script>
</body>
</html>
"#;
