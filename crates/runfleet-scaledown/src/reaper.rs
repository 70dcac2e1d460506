//! The reaper: orphan settlement and idle eviction.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use runfleet_cloud::{CloudClient, InstanceFilter};
use runfleet_github::{GithubError, GithubOps, ScopeClients, ScopedClientFactory};
use runfleet_model::{
    EvictionStrategy, InstanceRecord, RunnerScope, RunnerStatus, ScaleDownConfig, Tag,
    UpstreamRunner, keys,
};

use crate::error::ScaleDownResult;

/// The scale-down reaper. One `reconcile` call is one pass; the periodic
/// scheduler serialises passes, so no internal locking is needed.
pub struct ScaleDown {
    cloud: Arc<dyn CloudClient>,
    factory: Arc<dyn ScopedClientFactory>,
    config: ScaleDownConfig,
}

/// Per-invocation upstream caches, discarded on return.
struct PassCaches {
    clients: ScopeClients,
    runners: HashMap<String, Vec<UpstreamRunner>>,
    /// Orphans rescued in phase 1; excluded from phase 2 this pass so a
    /// rescue is never followed by an eviction in the same tick.
    rescued: HashSet<String>,
}

impl ScaleDown {
    pub fn new(
        cloud: Arc<dyn CloudClient>,
        factory: Arc<dyn ScopedClientFactory>,
        config: ScaleDownConfig,
    ) -> Self {
        Self {
            cloud,
            factory,
            config,
        }
    }

    /// Run the reaper on an interval until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "scale-down reaper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.reconcile().await;
                }
                _ = shutdown.changed() => {
                    info!("scale-down reaper shutting down");
                    break;
                }
            }
        }
    }

    /// One full pass, guarded at the outermost frame.
    pub async fn reconcile(&self) {
        self.reconcile_at(Utc::now()).await;
    }

    pub async fn reconcile_at(&self, now: DateTime<Utc>) {
        let mut caches = PassCaches {
            clients: ScopeClients::new(self.factory.clone()),
            runners: HashMap::new(),
            rescued: HashSet::new(),
        };

        if let Err(e) = self.settle_orphans(&mut caches).await {
            warn!(error = %e, "orphan settlement failed");
        }
        if let Err(e) = self.evict_idle(&mut caches, now).await {
            warn!(error = %e, "idle eviction failed");
        }
    }

    // ── Phase 1: orphan settlement ────────────────────────────────

    async fn settle_orphans(&self, caches: &mut PassCaches) -> ScaleDownResult<()> {
        let filter = InstanceFilter::environment(&self.config.environment).orphan(true);
        let orphans = self.cloud.list_instances(&filter).await?;

        for instance in orphans {
            match instance.runner_id {
                // No registration was ever observed: nothing to verify.
                None => self.terminate_orphan(&instance, "no runner id").await,
                Some(runner_id) => {
                    self.last_chance_check(caches, &instance, runner_id).await;
                }
            }
        }
        Ok(())
    }

    /// One upstream probe before the kill: rescue false positives caused
    /// by transient tagging races.
    async fn last_chance_check(
        &self,
        caches: &mut PassCaches,
        instance: &InstanceRecord,
        runner_id: u64,
    ) {
        let scope = RunnerScope::parse(&instance.owner);
        let github = match caches.clients.get(&scope, 0).await {
            Ok(client) => client,
            Err(e) => {
                warn!(
                    instance_id = %instance.instance_id,
                    error = %e,
                    "upstream client unavailable, keeping orphan for next pass"
                );
                return;
            }
        };

        match github.get_runner(&scope, runner_id).await {
            Err(GithubError::NotFound) => {
                self.terminate_orphan(instance, "deregistered upstream").await;
            }
            Ok(runner) if runner.status == RunnerStatus::Offline && runner.busy => {
                self.terminate_orphan(instance, "offline and busy").await;
            }
            Ok(_) => {
                // False positive: the runner came back.
                info!(
                    instance_id = %instance.instance_id,
                    runner_id,
                    "orphan rescued, clearing tag"
                );
                if let Err(e) = self
                    .cloud
                    .untag(&instance.instance_id, &[Tag::new(keys::ORPHAN, "true")])
                    .await
                {
                    warn!(instance_id = %instance.instance_id, error = %e, "orphan untag failed");
                }
                caches.rescued.insert(instance.instance_id.clone());
            }
            Err(e) => {
                warn!(
                    instance_id = %instance.instance_id,
                    runner_id,
                    error = %e,
                    "last-chance probe failed, keeping orphan for next pass"
                );
            }
        }
    }

    async fn terminate_orphan(&self, instance: &InstanceRecord, reason: &str) {
        info!(instance_id = %instance.instance_id, reason, "terminating orphan");
        if let Err(e) = self.cloud.terminate(&instance.instance_id).await {
            warn!(instance_id = %instance.instance_id, error = %e, "orphan termination failed");
        }
    }

    // ── Phase 2: idle eviction ────────────────────────────────────

    async fn evict_idle(
        &self,
        caches: &mut PassCaches,
        now: DateTime<Utc>,
    ) -> ScaleDownResult<()> {
        let filter = InstanceFilter::environment(&self.config.environment).orphan(false);
        let active = self.cloud.list_instances(&filter).await?;

        let schedule = self.config.active_schedule(now);
        let mut idle_quota = schedule.map_or(0, |s| s.idle_count);
        let strategy = schedule.map_or_else(EvictionStrategy::default, |s| s.strategy);
        debug!(idle_quota, ?strategy, candidates = active.len(), "idle eviction pass");

        let mut by_owner: BTreeMap<String, Vec<InstanceRecord>> = BTreeMap::new();
        for instance in active {
            if caches.rescued.contains(&instance.instance_id) {
                debug!(instance_id = %instance.instance_id, "rescued this pass, skipping");
                continue;
            }
            by_owner.entry(instance.owner.clone()).or_default().push(instance);
        }

        for (owner, mut instances) in by_owner {
            match strategy {
                EvictionStrategy::OldestFirst => {
                    instances.sort_by_key(|i| i.launch_time);
                }
                EvictionStrategy::NewestFirst => {
                    instances.sort_by_key(|i| std::cmp::Reverse(i.launch_time));
                }
            }

            let scope = RunnerScope::parse(&owner);
            let github = match caches.clients.get(&scope, 0).await {
                Ok(client) => client,
                Err(e) => {
                    warn!(%owner, error = %e, "upstream client unavailable, skipping owner");
                    continue;
                }
            };

            let runners = match caches.runners.get(&owner) {
                Some(cached) => cached.clone(),
                None => match github.list_runners(&scope).await {
                    Ok(listed) => {
                        caches.runners.insert(owner.clone(), listed.clone());
                        listed
                    }
                    Err(e) => {
                        warn!(%owner, error = %e, "runner listing failed, skipping owner");
                        continue;
                    }
                },
            };

            for instance in instances {
                let matched: Vec<&UpstreamRunner> = runners
                    .iter()
                    .filter(|r| r.name.ends_with(&instance.instance_id))
                    .collect();

                if matched.is_empty() {
                    self.handle_unregistered(&instance, now).await;
                    continue;
                }

                if instance.minutes_running(now) < self.config.minimum_running_minutes {
                    debug!(instance_id = %instance.instance_id, "below minimum running time");
                    continue;
                }
                if idle_quota > 0 {
                    idle_quota -= 1;
                    debug!(instance_id = %instance.instance_id, idle_quota, "preserved as idle");
                    continue;
                }

                // Re-check busyness directly rather than trusting the
                // listing snapshot: shrinks the job-pickup race window.
                let busy = match github.get_runner(&scope, matched[0].id).await {
                    Ok(runner) => runner.busy,
                    Err(e) => {
                        warn!(
                            instance_id = %instance.instance_id,
                            error = %e,
                            "busy re-check failed, keeping instance"
                        );
                        continue;
                    }
                };
                if busy {
                    debug!(instance_id = %instance.instance_id, "busy, keeping");
                    continue;
                }

                self.deregister_and_terminate(github.as_ref(), &scope, &instance, &matched)
                    .await;
            }
        }
        Ok(())
    }

    /// An instance with no upstream registration: orphan it once it is
    /// past the boot threshold, otherwise give it more time.
    async fn handle_unregistered(&self, instance: &InstanceRecord, now: DateTime<Utc>) {
        if instance.minutes_running(now) < self.config.boot_time_minutes {
            debug!(instance_id = %instance.instance_id, "still booting");
            return;
        }
        info!(
            instance_id = %instance.instance_id,
            "no registration past boot threshold, marking orphan"
        );
        if let Err(e) = self
            .cloud
            .tag(&instance.instance_id, &[Tag::new(keys::ORPHAN, "true")])
            .await
        {
            warn!(instance_id = %instance.instance_id, error = %e, "orphan tagging failed");
        }
    }

    /// Every matched registration must deregister with a clean 204 before
    /// the instance is terminated; otherwise the orphan pass retries.
    async fn deregister_and_terminate(
        &self,
        github: &dyn GithubOps,
        scope: &RunnerScope,
        instance: &InstanceRecord,
        matched: &[&UpstreamRunner],
    ) {
        for runner in matched {
            if let Err(e) = github.delete_runner(scope, runner.id).await {
                warn!(
                    instance_id = %instance.instance_id,
                    runner_id = runner.id,
                    error = %e,
                    "deregistration failed, not terminating"
                );
                return;
            }
        }
        info!(
            instance_id = %instance.instance_id,
            runners = matched.len(),
            "idle instance deregistered, terminating"
        );
        if let Err(e) = self.cloud.terminate(&instance.instance_id).await {
            warn!(instance_id = %instance.instance_id, error = %e, "termination failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    use chrono::TimeZone;
    use runfleet_cloud::InMemoryCloud;
    use runfleet_github::fake::{FakeFactory, FakeGithub};
    use runfleet_model::{CreatedBy, tags::launch_tags};

    fn test_config(schedule_json: Option<&str>) -> ScaleDownConfig {
        let mut env = Map::from([("ENVIRONMENT".to_string(), "test".to_string())]);
        if let Some(json) = schedule_json {
            env.insert("SCALE_DOWN_CONFIG".to_string(), json.to_string());
        }
        ScaleDownConfig::from_env(&env).unwrap()
    }

    struct Harness {
        cloud: Arc<InMemoryCloud>,
        github: FakeGithub,
        reaper: ScaleDown,
        now: DateTime<Utc>,
    }

    fn harness(schedule_json: Option<&str>) -> Harness {
        let cloud = Arc::new(InMemoryCloud::new());
        let github = FakeGithub::new();
        let factory = Arc::new(FakeFactory::new(github.clone()));
        let reaper = ScaleDown::new(cloud.clone(), factory, test_config(schedule_json));
        Harness {
            cloud,
            github,
            reaper,
            now: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    /// Seed a managed org instance launched `age_minutes` before `now`.
    async fn seed(h: &Harness, owner: &str, age_minutes: i64, extra: &[(&str, &str)]) -> String {
        let mut tags = launch_tags(
            "test",
            &RunnerScope::parse(owner),
            CreatedBy::ScaleUp,
        );
        for (k, v) in extra {
            tags.push(Tag::new(*k, *v));
        }
        h.cloud
            .seed_instance(h.now - chrono::Duration::minutes(age_minutes), tags)
            .await
    }

    async fn register(h: &Harness, owner: &str, runner_id: u64, instance_id: &str, busy: bool) {
        h.github
            .add_runner(
                owner,
                UpstreamRunner {
                    id: runner_id,
                    name: format!("runner-{instance_id}"),
                    status: RunnerStatus::Online,
                    busy,
                },
            )
            .await;
    }

    const ALWAYS: &str = r#"[{"cron": "* * * * * *", "idleCount": 0}]"#;

    // Seed scenario: orphan with a live upstream runner is rescued.
    #[tokio::test]
    async fn orphan_false_positive_is_rescued() {
        let h = harness(Some(ALWAYS));
        let id = seed(
            &h,
            "acme",
            60,
            &[(keys::ORPHAN, "true"), (keys::RUNNER_ID, "42")],
        )
        .await;
        register(&h, "acme", 42, &id, false).await;

        h.reaper.reconcile_at(h.now).await;

        assert!(!h.cloud.is_terminated(&id).await);
        let tags = h.cloud.tags_of(&id).await.unwrap();
        assert!(!tags.contains_key(keys::ORPHAN));
        // Runner id tag is monotonic: still present after the rescue.
        assert_eq!(tags.get(keys::RUNNER_ID).map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn orphan_without_runner_id_is_terminated_unconditionally() {
        let h = harness(Some(ALWAYS));
        let id = seed(&h, "acme", 60, &[(keys::ORPHAN, "true")]).await;

        h.reaper.reconcile_at(h.now).await;
        assert!(h.cloud.is_terminated(&id).await);
    }

    #[tokio::test]
    async fn orphan_gone_upstream_is_terminated() {
        let h = harness(Some(ALWAYS));
        let id = seed(
            &h,
            "acme",
            60,
            &[(keys::ORPHAN, "true"), (keys::RUNNER_ID, "42")],
        )
        .await;
        // Runner 42 is not registered upstream: the probe returns 404.

        h.reaper.reconcile_at(h.now).await;
        assert!(h.cloud.is_terminated(&id).await);
    }

    #[tokio::test]
    async fn orphan_offline_and_busy_is_terminated() {
        let h = harness(Some(ALWAYS));
        let id = seed(
            &h,
            "acme",
            60,
            &[(keys::ORPHAN, "true"), (keys::RUNNER_ID, "42")],
        )
        .await;
        h.github
            .add_runner(
                "acme",
                UpstreamRunner {
                    id: 42,
                    name: format!("runner-{id}"),
                    status: RunnerStatus::Offline,
                    busy: true,
                },
            )
            .await;

        h.reaper.reconcile_at(h.now).await;
        assert!(h.cloud.is_terminated(&id).await);
    }

    // Seed scenario: four idle instances, quota two, oldest first — the
    // two oldest survive on quota, the two newest are reclaimed.
    #[tokio::test]
    async fn idle_quota_preserves_the_oldest_under_oldest_first() {
        let h = harness(Some(r#"[{"cron": "* * * * * *", "idleCount": 2}]"#));

        let oldest = seed(&h, "acme", 120, &[]).await;
        let older = seed(&h, "acme", 90, &[]).await;
        let newer = seed(&h, "acme", 60, &[]).await;
        let newest = seed(&h, "acme", 30, &[]).await;

        for (i, id) in [&oldest, &older, &newer, &newest].iter().enumerate() {
            register(&h, "acme", 100 + i as u64, id, false).await;
        }

        h.reaper.reconcile_at(h.now).await;

        assert!(!h.cloud.is_terminated(&oldest).await);
        assert!(!h.cloud.is_terminated(&older).await);
        assert!(h.cloud.is_terminated(&newer).await);
        assert!(h.cloud.is_terminated(&newest).await);

        // The reclaimed instances were deregistered first.
        let deleted = h.github.deleted().await;
        assert_eq!(deleted.len(), 2);
    }

    #[tokio::test]
    async fn newest_first_preserves_the_newest() {
        let h = harness(Some(
            r#"[{"cron": "* * * * * *", "idleCount": 1, "evictionStrategy": "newest_first"}]"#,
        ));

        let old = seed(&h, "acme", 120, &[]).await;
        let new = seed(&h, "acme", 30, &[]).await;
        register(&h, "acme", 1, &old, false).await;
        register(&h, "acme", 2, &new, false).await;

        h.reaper.reconcile_at(h.now).await;

        assert!(!h.cloud.is_terminated(&new).await);
        assert!(h.cloud.is_terminated(&old).await);
    }

    #[tokio::test]
    async fn young_instances_are_never_reclaimed() {
        let h = harness(Some(ALWAYS));
        let id = seed(&h, "acme", 2, &[]).await; // below the 5 minute default
        register(&h, "acme", 1, &id, false).await;

        h.reaper.reconcile_at(h.now).await;
        assert!(!h.cloud.is_terminated(&id).await);
        assert!(h.github.deleted().await.is_empty());
    }

    #[tokio::test]
    async fn busy_runners_are_kept() {
        let h = harness(Some(ALWAYS));
        let id = seed(&h, "acme", 60, &[]).await;
        register(&h, "acme", 1, &id, true).await;

        h.reaper.reconcile_at(h.now).await;
        assert!(!h.cloud.is_terminated(&id).await);
    }

    #[tokio::test]
    async fn failed_deregistration_blocks_termination() {
        let h = harness(Some(ALWAYS));
        let id = seed(&h, "acme", 60, &[]).await;
        register(&h, "acme", 7, &id, false).await;
        h.github.fail_delete(7).await;

        h.reaper.reconcile_at(h.now).await;
        assert!(!h.cloud.is_terminated(&id).await);
    }

    #[tokio::test]
    async fn unregistered_instance_past_boot_threshold_is_orphaned() {
        let h = harness(Some(ALWAYS));
        let expired = seed(&h, "acme", 10, &[]).await; // past the 5 minute default
        let booting = seed(&h, "acme", 2, &[]).await;

        h.reaper.reconcile_at(h.now).await;

        // Tagged, not terminated: phase 1 of the next pass settles it.
        assert!(!h.cloud.is_terminated(&expired).await);
        let tags = h.cloud.tags_of(&expired).await.unwrap();
        assert_eq!(tags.get(keys::ORPHAN).map(String::as_str), Some("true"));

        let booting_tags = h.cloud.tags_of(&booting).await.unwrap();
        assert!(!booting_tags.contains_key(keys::ORPHAN));
    }

    #[tokio::test]
    async fn quota_spans_owner_groups() {
        let h = harness(Some(r#"[{"cron": "* * * * * *", "idleCount": 2}]"#));

        // Two owners, one idle instance each; the global quota of two
        // preserves both.
        let a = seed(&h, "acme", 60, &[]).await;
        let b = seed(&h, "beta", 60, &[]).await;
        register(&h, "acme", 1, &a, false).await;
        register(&h, "beta", 2, &b, false).await;

        h.reaper.reconcile_at(h.now).await;

        assert!(!h.cloud.is_terminated(&a).await);
        assert!(!h.cloud.is_terminated(&b).await);
    }

    #[tokio::test]
    async fn without_an_active_schedule_no_idle_runners_are_kept() {
        let h = harness(None);
        let id = seed(&h, "acme", 60, &[]).await;
        register(&h, "acme", 1, &id, false).await;

        h.reaper.reconcile_at(h.now).await;
        assert!(h.cloud.is_terminated(&id).await);
    }

    #[tokio::test]
    async fn runner_list_is_cached_per_owner_within_a_pass() {
        let h = harness(Some(ALWAYS));
        let a = seed(&h, "acme", 60, &[]).await;
        let b = seed(&h, "acme", 61, &[]).await;
        register(&h, "acme", 1, &a, true).await;
        register(&h, "acme", 2, &b, true).await;

        h.reaper.reconcile_at(h.now).await;
        assert_eq!(h.github.list_runner_calls(), 1);
    }
}
