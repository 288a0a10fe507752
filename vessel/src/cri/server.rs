//! CRI socket server.
//!
//! Serves newline-delimited JSON request envelopes over a local TCP
//! socket. Each connection is handled by its own task; individual requests
//! run on blocking workers because lifecycle operations (stop, exec_sync)
//! legitimately block.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use vessel_shared::cri::{self, CriRequest, CriResponse};
use vessel_shared::{VesselError, VesselResult};

use super::service::CriService;
use super::{ImageService, RuntimeService, status_code};
use crate::runtime::VesselRuntime;

/// Bind the CRI endpoint on localhost and serve until the listener errors.
pub async fn serve(runtime: VesselRuntime, port: u16) -> VesselResult<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| VesselError::Internal(format!("binding CRI port {}: {}", port, e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| VesselError::Internal(e.to_string()))?;
    tracing::info!(addr = %local, "CRI endpoint listening");

    let service = Arc::new(CriService::new(
        runtime,
        format!("http://127.0.0.1:{}", local.port()),
    ));

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| VesselError::Internal(format!("accepting CRI connection: {}", e)))?;
        tracing::debug!(peer = %peer, "CRI connection accepted");
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(service, stream).await {
                tracing::debug!(peer = %peer, error = %e, "CRI connection closed");
            }
        });
    }
}

async fn handle_connection(
    service: Arc<CriService>,
    stream: TcpStream,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<CriRequest>(&line) {
            Ok(request) => {
                let service = service.clone();
                tokio::task::spawn_blocking(move || dispatch(&service, request))
                    .await
                    .unwrap_or_else(|e| {
                        CriResponse::err(0, cri::CriStatusCode::Internal, e.to_string())
                    })
            }
            Err(e) => CriResponse::err(
                0,
                cri::CriStatusCode::InvalidArgument,
                format!("malformed request: {}", e),
            ),
        };
        let mut payload = serde_json::to_vec(&response).unwrap_or_default();
        payload.push(b'\n');
        write_half.write_all(&payload).await?;
    }
    Ok(())
}

/// Route one request to the service; errors become CRI status codes.
pub(crate) fn dispatch(service: &CriService, request: CriRequest) -> CriResponse {
    let id = request.id;
    match route(service, &request.method, request.params) {
        Ok(value) => CriResponse::ok(id, value),
        Err(e) => CriResponse::err(id, status_code(&e), e.to_string()),
    }
}

fn route(
    service: &CriService,
    method: &str,
    params: serde_json::Value,
) -> VesselResult<serde_json::Value> {
    match method {
        "Version" => {
            #[derive(Deserialize, Default)]
            struct P {
                #[serde(default)]
                version: String,
            }
            let p: P = parse(params)?;
            json(service.version(&p.version)?)
        }
        "Status" => json(service.status()?),

        "RunPodSandbox" => {
            #[derive(Deserialize)]
            struct P {
                config: cri::PodSandboxConfig,
            }
            let p: P = parse_required(params)?;
            Ok(serde_json::json!({ "pod_sandbox_id": service.run_pod_sandbox(p.config)? }))
        }
        "StopPodSandbox" => {
            let p: SandboxTarget = parse_required(params)?;
            service.stop_pod_sandbox(&p.pod_sandbox_id)?;
            json(serde_json::json!({}))
        }
        "RemovePodSandbox" => {
            let p: SandboxTarget = parse_required(params)?;
            service.remove_pod_sandbox(&p.pod_sandbox_id)?;
            json(serde_json::json!({}))
        }
        "PodSandboxStatus" => {
            let p: SandboxTarget = parse_required(params)?;
            Ok(serde_json::json!({ "status": service.pod_sandbox_status(&p.pod_sandbox_id)? }))
        }
        "ListPodSandbox" => {
            #[derive(Deserialize, Default)]
            struct P {
                #[serde(default)]
                filter: Option<cri::PodSandboxFilter>,
            }
            let p: P = parse(params)?;
            Ok(serde_json::json!({ "items": service.list_pod_sandbox(p.filter)? }))
        }

        "CreateContainer" => {
            #[derive(Deserialize)]
            struct P {
                pod_sandbox_id: String,
                config: cri::ContainerConfig,
            }
            let p: P = parse_required(params)?;
            Ok(serde_json::json!({
                "container_id": service.create_container(&p.pod_sandbox_id, p.config)?
            }))
        }
        "StartContainer" => {
            let p: ContainerTarget = parse_required(params)?;
            service.start_container(&p.container_id)?;
            json(serde_json::json!({}))
        }
        "StopContainer" => {
            #[derive(Deserialize)]
            struct P {
                container_id: String,
                #[serde(default)]
                timeout: i64,
            }
            let p: P = parse_required(params)?;
            service.stop_container(&p.container_id, p.timeout)?;
            json(serde_json::json!({}))
        }
        "RemoveContainer" => {
            let p: ContainerTarget = parse_required(params)?;
            service.remove_container(&p.container_id)?;
            json(serde_json::json!({}))
        }
        "ListContainers" => {
            #[derive(Deserialize, Default)]
            struct P {
                #[serde(default)]
                filter: Option<cri::ContainerFilter>,
            }
            let p: P = parse(params)?;
            Ok(serde_json::json!({ "containers": service.list_containers(p.filter)? }))
        }
        "ContainerStatus" => {
            let p: ContainerTarget = parse_required(params)?;
            Ok(serde_json::json!({ "status": service.container_status(&p.container_id)? }))
        }
        "ContainerStats" => {
            let p: ContainerTarget = parse_required(params)?;
            Ok(serde_json::json!({ "stats": service.container_stats(&p.container_id)? }))
        }
        "ListContainerStats" => {
            #[derive(Deserialize, Default)]
            struct P {
                #[serde(default)]
                filter: Option<cri::ContainerStatsFilter>,
            }
            let p: P = parse(params)?;
            Ok(serde_json::json!({ "stats": service.list_container_stats(p.filter)? }))
        }

        "ExecSync" => {
            #[derive(Deserialize)]
            struct P {
                container_id: String,
                cmd: Vec<String>,
                #[serde(default)]
                timeout: i64,
            }
            let p: P = parse_required(params)?;
            json(service.exec_sync(&p.container_id, p.cmd, p.timeout)?)
        }
        "Exec" => json(service.exec(parse_required::<cri::ExecRequest>(params)?)?),
        "Attach" => json(service.attach(parse_required::<cri::AttachRequest>(params)?)?),
        "PortForward" => {
            json(service.port_forward(parse_required::<cri::PortForwardRequest>(params)?)?)
        }

        "ListImages" => {
            #[derive(Deserialize, Default)]
            struct P {
                #[serde(default)]
                filter: Option<cri::ImageFilter>,
            }
            let p: P = parse(params)?;
            Ok(serde_json::json!({ "images": service.list_images(p.filter)? }))
        }
        "ImageStatus" => {
            let p: ImageTarget = parse_required(params)?;
            Ok(serde_json::json!({ "image": service.image_status(p.image)? }))
        }
        "RemoveImage" => {
            let p: ImageTarget = parse_required(params)?;
            service.remove_image(p.image)?;
            json(serde_json::json!({}))
        }
        "ImageFsInfo" => {
            Ok(serde_json::json!({ "image_filesystems": service.image_fs_info()? }))
        }

        other => Err(VesselError::Unsupported(format!(
            "unknown CRI method: {}",
            other
        ))),
    }
}

#[derive(Deserialize)]
struct SandboxTarget {
    pod_sandbox_id: String,
}

#[derive(Deserialize)]
struct ContainerTarget {
    container_id: String,
}

#[derive(Deserialize)]
struct ImageTarget {
    image: cri::ImageSpec,
}

fn parse<T: DeserializeOwned + Default>(value: serde_json::Value) -> VesselResult<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value)
        .map_err(|e| VesselError::InvalidArg(format!("malformed parameters: {}", e)))
}

fn parse_required<T: DeserializeOwned>(value: serde_json::Value) -> VesselResult<T> {
    serde_json::from_value(value)
        .map_err(|e| VesselError::InvalidArg(format!("malformed parameters: {}", e)))
}

fn json<T: serde::Serialize>(value: T) -> VesselResult<serde_json::Value> {
    serde_json::to_value(value).map_err(Into::into)
}
