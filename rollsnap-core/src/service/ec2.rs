/*!
Amazon EC2 (EBS) snapshot service adapter.

This module drives the EBS snapshot control plane through the official AWS SDK.
*/

use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ec2::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::primitives::DateTime as AwsDateTime;
use aws_sdk_ec2::types::{Filter, Snapshot};
use aws_sdk_ec2::Client as Ec2Client;
use chrono::{DateTime, Utc};
use rollsnap_retry::{permanent_error, transient_error, with_policy, RetryError, RetryPolicy};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, error, info};

#[cfg(feature = "metrics")]
use crate::observability::MetricsTimer;
use crate::config::Ec2Config;
use crate::record::{SnapshotRecord, SnapshotState};
use crate::{Result, RotateError};

use super::SnapshotService;

/// Error codes for requests EC2 rejected before acting on them
const THROTTLING_ERROR_CODES: &[&str] = &["RequestLimitExceeded", "Throttling"];

/// Server-side failures; safe to re-send only for idempotent requests
const TRANSIENT_ERROR_CODES: &[&str] = &["InternalError", "ServiceUnavailable", "Unavailable"];

/// Which failures of a request may be re-sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resend {
    /// Repeating the request has no further effect (describe, delete)
    Idempotent,
    /// `CreateSnapshot` takes no client token; a re-send may duplicate it
    OnlyIfThrottled,
}

/// Page size for `DescribeSnapshots`
const DESCRIBE_PAGE_SIZE: i32 = 1000;

/// EBS snapshot service backed by the EC2 API
///
/// # Authentication
/// The adapter uses the standard AWS credential provider chain:
/// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN)
/// 2. Shared credentials and config files, optionally with a named profile
/// 3. IAM roles for EC2 instances
///
/// # Example
/// ```rust,no_run
/// use rollsnap_core::config::Ec2Config;
/// use rollsnap_core::service::{Ec2SnapshotService, SnapshotService};
///
/// let service = Ec2SnapshotService::new(&Ec2Config::with_region("us-east-1"))?;
/// let snapshots = service.describe_snapshots("vol-06f30e77", "nightly")?;
/// # Ok::<(), rollsnap_core::RotateError>(())
/// ```
#[derive(Debug)]
pub struct Ec2SnapshotService {
    client: Ec2Client,
    runtime: Runtime,
    retry_policy: RetryPolicy,
}

impl Ec2SnapshotService {
    /// Create a new EC2 snapshot service from connection settings
    ///
    /// # Errors
    /// Returns an error if:
    /// - The Tokio runtime cannot be created
    /// - No AWS credentials provider is available
    pub fn new(config: &Ec2Config) -> Result<Self> {
        config.validate()?;
        let runtime = build_runtime()?;

        // Retries are owned by `retry_policy`, so `max_attempts` is the real bound.
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(Duration::from_secs(config.operation_timeout_secs))
                    .build(),
            );
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = runtime.block_on(loader.load());

        if sdk_config.credentials_provider().is_none() {
            return Err(RotateError::configuration(
                "AWS credentials not found. Set AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY, use a profile, or run with an instance role",
            ));
        }

        info!(
            region = ?sdk_config.region(),
            profile = ?config.profile,
            "Initialized EC2 snapshot service"
        );

        Ok(Self {
            client: Ec2Client::new(&sdk_config),
            runtime,
            retry_policy: RetryPolicy::cloud_api(config.max_attempts),
        })
    }

    /// Create a new EC2 snapshot service with explicit AWS configuration
    pub fn with_config(sdk_config: &SdkConfig, retry_policy: RetryPolicy) -> Result<Self> {
        let runtime = build_runtime()?;
        info!(region = ?sdk_config.region(), "Initialized EC2 snapshot service with custom config");
        Ok(Self {
            client: Ec2Client::new(sdk_config),
            runtime,
            retry_policy,
        })
    }

    fn describe_page(
        &self,
        volume_id: &str,
        description: &str,
        next_token: Option<String>,
    ) -> std::result::Result<(Vec<Snapshot>, Option<String>), RetryError> {
        let client = &self.client;
        self.runtime.block_on(with_policy(
            "describe_snapshots",
            self.retry_policy.clone(),
            |_attempt| {
                let request = client
                    .describe_snapshots()
                    .owner_ids("self")
                    .filters(Filter::builder().name("volume-id").values(volume_id).build())
                    .filters(Filter::builder().name("description").values(description).build())
                    .max_results(DESCRIBE_PAGE_SIZE)
                    .set_next_token(next_token.clone());
                async move {
                    #[cfg(feature = "metrics")]
                    let timer = MetricsTimer::start_ec2_operation("describe_snapshots");
                    let result = request.send().await;
                    #[cfg(feature = "metrics")]
                    finish_timer(timer, result.is_ok());

                    result
                        .map(|output| {
                            (
                                output.snapshots().to_vec(),
                                output.next_token().map(str::to_string),
                            )
                        })
                        .map_err(|e| classify("describe_snapshots", Resend::Idempotent, e, volume_id))
                }
            },
        ))
    }
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            RotateError::configuration(format!(
                "Failed to create async runtime for EC2 client: {e}"
            ))
        })
}

#[cfg(feature = "metrics")]
fn finish_timer(timer: MetricsTimer, ok: bool) {
    if ok {
        timer.finish();
    } else {
        timer.finish_with_error();
    }
}

impl SnapshotService for Ec2SnapshotService {
    fn describe_snapshots(&self, volume_id: &str, description: &str) -> Result<Vec<SnapshotRecord>> {
        debug!(volume_id, description, "Describing EC2 snapshots");

        let mut records = Vec::new();
        let mut next_token = None;
        loop {
            let (snapshots, token) = self.describe_page(volume_id, description, next_token)?;
            for snapshot in &snapshots {
                records.push(record_from_snapshot(snapshot)?);
            }
            match token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        debug!(volume_id, count = records.len(), "Described EC2 snapshots");
        Ok(records)
    }

    fn create_snapshot(&self, volume_id: &str, description: &str) -> Result<SnapshotRecord> {
        info!(volume_id, description, "Creating EC2 snapshot");

        let client = &self.client;
        let output = self.runtime.block_on(with_policy(
            "create_snapshot",
            self.retry_policy.clone(),
            |_attempt| {
                let request = client
                    .create_snapshot()
                    .volume_id(volume_id)
                    .description(description);
                async move {
                    #[cfg(feature = "metrics")]
                    let timer = MetricsTimer::start_ec2_operation("create_snapshot");
                    let result = request.send().await;
                    #[cfg(feature = "metrics")]
                    finish_timer(timer, result.is_ok());

                    result.map_err(|e| classify("create_snapshot", Resend::OnlyIfThrottled, e, volume_id))
                }
            },
        ));

        let output = output.map_err(|e| {
            error!(volume_id, error = %e, "Failed to create EC2 snapshot");
            RotateError::from(e)
        })?;

        let snapshot_id = output
            .snapshot_id()
            .ok_or_else(|| RotateError::invalid_record("CreateSnapshot response has no snapshot id"))?;
        let state = output
            .state()
            .map(|s| SnapshotState::from(s.as_str()))
            .unwrap_or_else(|| SnapshotState::Other("unknown".to_string()));
        let started_at = output
            .start_time()
            .and_then(to_chrono)
            .unwrap_or_else(Utc::now);

        Ok(SnapshotRecord::new(
            snapshot_id,
            output.volume_id().unwrap_or(volume_id),
            output.description().unwrap_or(description),
            state,
            started_at,
        ))
    }

    fn delete_snapshot(&self, snapshot_id: &str) -> Result<String> {
        debug!(snapshot_id, "Deleting EC2 snapshot");

        let client = &self.client;
        self.runtime
            .block_on(with_policy(
                "delete_snapshot",
                self.retry_policy.clone(),
                |_attempt| {
                    let request = client.delete_snapshot().snapshot_id(snapshot_id);
                    async move {
                        #[cfg(feature = "metrics")]
                        let timer = MetricsTimer::start_ec2_operation("delete_snapshot");
                        let result = request.send().await;
                        #[cfg(feature = "metrics")]
                        finish_timer(timer, result.is_ok());

                        result.map_err(|e| classify("delete_snapshot", Resend::Idempotent, e, snapshot_id))
                    }
                },
            ))
            .map_err(|e| {
                error!(snapshot_id, error = %e, "Failed to delete EC2 snapshot");
                RotateError::from(e)
            })?;

        // DeleteSnapshot returns an empty body; success is the acknowledgment.
        Ok(snapshot_id.to_string())
    }
}

/// Normalize an SDK snapshot into a record
fn record_from_snapshot(snapshot: &Snapshot) -> Result<SnapshotRecord> {
    let snapshot_id = snapshot
        .snapshot_id()
        .ok_or_else(|| RotateError::invalid_record("snapshot without an id"))?;
    let started_at = snapshot.start_time().and_then(to_chrono).ok_or_else(|| {
        RotateError::invalid_record(format!("snapshot {snapshot_id} has no start time"))
    })?;
    let state = snapshot
        .state()
        .map(|s| SnapshotState::from(s.as_str()))
        .unwrap_or_else(|| SnapshotState::Other("unknown".to_string()));

    Ok(SnapshotRecord::new(
        snapshot_id,
        snapshot.volume_id().unwrap_or_default(),
        snapshot.description().unwrap_or_default(),
        state,
        started_at,
    ))
}

fn to_chrono(time: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
}

/// True if the failed request may be sent again
fn is_transient<E: ProvideErrorMetadata, R>(error: &SdkError<E, R>, resend: Resend) -> bool {
    let code = match error {
        SdkError::DispatchFailure(_) => return resend == Resend::Idempotent,
        SdkError::ServiceError(service_err) => service_err.err().code(),
        _ => return false,
    };
    match code {
        Some(code) if THROTTLING_ERROR_CODES.contains(&code) => true,
        Some(code) if TRANSIENT_ERROR_CODES.contains(&code) => resend == Resend::Idempotent,
        _ => false,
    }
}

/// Map an SDK error to a retry classification carrying a descriptive error
fn classify<E, R>(op: &'static str, resend: Resend, error: SdkError<E, R>, subject: &str) -> RetryError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    let transient = is_transient(&error, resend);
    let mapped = map_ec2_error(op, error, subject);
    if transient {
        transient_error!(op, mapped)
    } else {
        permanent_error!(op, mapped)
    }
}

/// Map AWS SDK errors to RotateError with appropriate context
fn map_ec2_error<E, R>(op: &str, error: SdkError<E, R>, subject: &str) -> RotateError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match &error {
        SdkError::DispatchFailure(dispatch_err) => {
            RotateError::service(format!("EC2 {op} request failed to dispatch: {dispatch_err:?}"))
        }
        SdkError::TimeoutError(_) => {
            RotateError::service(format!("EC2 {op} request timed out ({subject})"))
        }
        SdkError::ResponseError(response_err) => {
            RotateError::service(format!("EC2 {op} response error: {response_err:?}"))
        }
        SdkError::ServiceError(service_err) => {
            let err = service_err.err();
            match err.code() {
                Some("InvalidVolume.NotFound") => {
                    RotateError::service(format!("EC2 volume '{subject}' not found"))
                }
                Some("InvalidSnapshot.NotFound") => {
                    RotateError::service(format!("EC2 snapshot '{subject}' not found"))
                }
                Some("InvalidSnapshot.InUse") => RotateError::service(format!(
                    "EC2 snapshot '{subject}' is in use (e.g. by a registered AMI)"
                )),
                Some("UnauthorizedOperation") | Some("AuthFailure") => RotateError::service(
                    format!("Access denied to EC2 {op} (check credentials and IAM permissions)"),
                ),
                Some(code) => RotateError::service(format!(
                    "EC2 service error ({code}): {}",
                    err.message().unwrap_or("Unknown error")
                )),
                None => RotateError::service(format!("EC2 {op} service error: {service_err:?}")),
            }
        }
        _ => RotateError::service(format!("EC2 {op} error: {error:?}")),
    }
}
