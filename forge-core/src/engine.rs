//! Hand-off seam to the external build engine.
//!
//! The engine owns caching, layer execution and output export; this module
//! only pairs each resolved job with a usable worker and hands both over.

use crate::driver::DriverInfo;
use crate::error::{ForgeError, Result};
use crate::options::BuildOptions;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// One job paired with the worker chosen to run it.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub target: String,
    pub worker: String,
    pub platforms: Vec<String>,
    pub tags: Vec<String>,
}

/// Submit the job table to the build engine.
///
/// Each job is matched to the first usable worker that supports its platform
/// set (a worker with no declared platforms accepts anything). Fails when no
/// usable workers are left, or when a job's platform is served by none of
/// them. Building itself is the engine's business; drivers carry the live
/// connections it needs.
#[instrument(skip(options, drivers), fields(jobs = options.len()))]
pub async fn submit(
    options: &BTreeMap<String, BuildOptions>,
    drivers: &[DriverInfo],
) -> Result<Vec<Submission>> {
    let usable: Vec<&DriverInfo> = drivers.iter().filter(|d| d.driver.is_some()).collect();
    if usable.is_empty() {
        return Err(ForgeError::NoUsableWorkers);
    }

    let mut submissions = Vec::with_capacity(options.len());
    for (name, opts) in options {
        let worker = usable
            .iter()
            .find(|d| supports(d, opts))
            .ok_or_else(|| ForgeError::InvalidConfig {
                reason: format!(
                    "no usable worker supports the platforms of target '{}'",
                    name
                ),
            })?;

        info!(target = %name, worker = %worker.name, "submitting build job");
        submissions.push(Submission {
            target: name.clone(),
            worker: worker.name.clone(),
            platforms: opts.platforms.iter().map(|p| p.to_string()).collect(),
            tags: opts.tags.clone(),
        });
    }

    Ok(submissions)
}

fn supports(driver: &DriverInfo, opts: &BuildOptions) -> bool {
    if driver.platforms.is_empty() {
        return true;
    }
    opts.platforms.iter().all(|p| driver.platforms.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;

    fn info(name: &str, platforms: &[&str]) -> DriverInfo {
        DriverInfo {
            name: name.to_string(),
            platforms: platforms.iter().map(|p| Platform::parse(p).unwrap()).collect(),
            driver: None,
            err: None,
        }
    }

    #[tokio::test]
    async fn test_no_usable_workers() {
        let options = BTreeMap::from([("app".to_string(), BuildOptions::default())]);
        // A failed driver slot is not usable.
        let drivers = vec![info("worker0", &[])];
        let err = submit(&options, &drivers).await.unwrap_err();
        assert!(matches!(err, ForgeError::NoUsableWorkers));
    }

    #[test]
    fn test_supports_platform_matching() {
        let arm_worker = info("worker0", &["linux/arm/v7"]);
        let open_worker = info("worker1", &[]);

        let mut arm_job = BuildOptions::default();
        arm_job.platforms = vec![Platform::parse("linux/arm/v7").unwrap()];
        let mut amd_job = BuildOptions::default();
        amd_job.platforms = vec![Platform::parse("linux/amd64").unwrap()];

        assert!(supports(&arm_worker, &arm_job));
        assert!(!supports(&arm_worker, &amd_job));
        assert!(supports(&open_worker, &amd_job));
    }
}
