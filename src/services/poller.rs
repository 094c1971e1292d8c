use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::models::{generate_api_key, PaymentEvent};
use crate::services::{
    BackoffPolicy, ChainLogSource, CredentialStore, EventDecoder, UpsertOutcome, WatermarkTracker,
};
use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    pub backoff: BackoffPolicy,
    /// Upper bound on blocks covered by one cycle
    pub max_block_range: u64,
}

impl PollerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            backoff: config.backoff_policy(),
            max_block_range: config.max_block_range,
        }
    }
}

/// Outcome of one successful poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReport {
    /// Head has not moved past the watermark; nothing was fetched.
    Idle { head: u64 },
    /// `from_block..=to_block` was fetched and applied; watermark is now `to_block`.
    Applied {
        from_block: u64,
        to_block: u64,
        head: u64,
        applied: usize,
        skipped: usize,
    },
}

impl CycleReport {
    /// False when the cycle stopped short of the head because of the range cap.
    pub fn caught_up(&self) -> bool {
        match self {
            CycleReport::Idle { .. } => true,
            CycleReport::Applied { to_block, head, .. } => to_block >= head,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub events_applied: u64,
    pub decode_skipped: u64,
}

/// Drives the watermark forward: fetch, decode, apply in log order, advance.
pub struct PaymentPoller {
    source: Arc<dyn ChainLogSource>,
    decoder: EventDecoder,
    store: Arc<dyn CredentialStore>,
    watermark: WatermarkTracker,
    contract: Address,
    settings: PollerSettings,
    stats: PollerStats,
}

impl PaymentPoller {
    pub fn new(
        source: Arc<dyn ChainLogSource>,
        decoder: EventDecoder,
        store: Arc<dyn CredentialStore>,
        watermark: WatermarkTracker,
        contract: Address,
        settings: PollerSettings,
    ) -> Self {
        Self {
            source,
            decoder,
            store,
            watermark,
            contract,
            settings,
            stats: PollerStats::default(),
        }
    }

    pub fn watermark(&self) -> u64 {
        self.watermark.get()
    }

    pub fn stats(&self) -> PollerStats {
        self.stats
    }

    /// Polls until `cancel` fires. Cancellation is observed between cycles,
    /// never in the middle of applying a batch.
    pub async fn run(&mut self, cancel: CancellationToken) {
        tracing::info!(
            contract = %format!("{:#x}", self.contract),
            watermark = self.watermark.get(),
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "Listening for payments"
        );

        let mut consecutive_failures = 0u32;

        while !cancel.is_cancelled() {
            let delay = match self.run_cycle().await {
                Ok(report) => {
                    consecutive_failures = 0;
                    if report.caught_up() {
                        self.settings.poll_interval
                    } else {
                        Duration::ZERO
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.stats.failed_cycles += 1;
                    let delay = self.settings.backoff.delay(consecutive_failures);
                    tracing::error!(
                        error = %e,
                        error_kind = e.kind(),
                        watermark = self.watermark.get(),
                        attempt = consecutive_failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "Poll cycle failed, range will be retried"
                    );
                    delay
                }
            };

            if delay.is_zero() {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(
            watermark = self.watermark.get(),
            stats = ?self.stats,
            "Payment poller stopped"
        );
    }

    /// One pass over `(watermark, min(head, watermark + max_block_range)]`.
    ///
    /// The watermark only moves when every decodable log in the range was
    /// applied; any fetch or store failure leaves it where it was.
    pub async fn run_cycle(&mut self) -> RelayResult<CycleReport> {
        self.stats.cycles += 1;

        let head = self.source.current_head().await?;
        let watermark = self.watermark.get();

        if head <= watermark {
            if head < watermark {
                tracing::debug!(head, watermark, "Node reports a head behind the watermark");
            }
            return Ok(CycleReport::Idle { head });
        }

        let from_block = watermark + 1;
        let to_block = head.min(watermark.saturating_add(self.settings.max_block_range));

        let logs = self
            .source
            .get_logs(self.contract, from_block, to_block)
            .await
            .map_err(|e| {
                tracing::warn!(
                    from_block,
                    to_block,
                    error_kind = e.kind(),
                    "Log fetch failed"
                );
                e
            })?;

        let mut events = Vec::with_capacity(logs.len());
        let mut skipped = 0usize;
        for log in &logs {
            match self.decoder.decode(log) {
                Ok(event) => events.push(event),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        error = %e,
                        error_kind = e.kind(),
                        block = log.block_number.map(|n| n.as_u64()),
                        log_index = ?log.log_index,
                        tx = ?log.transaction_hash,
                        "Skipping undecodable log"
                    );
                }
            }
        }
        self.stats.decode_skipped += skipped as u64;

        // Last event per address must win, whatever order the node returned.
        events.sort_by_key(|event| event.position);

        for event in &events {
            self.apply(event).await.map_err(|e| {
                tracing::error!(
                    error = %e,
                    error_kind = e.kind(),
                    address = %event.payer_key(),
                    block = event.position.block_number,
                    log_index = event.position.log_index,
                    from_block,
                    to_block,
                    "Credential update failed, aborting batch"
                );
                e
            })?;
            self.stats.events_applied += 1;
        }

        self.watermark.advance(to_block);

        tracing::debug!(
            from_block,
            to_block,
            head,
            applied = events.len(),
            skipped,
            "Block range processed"
        );

        Ok(CycleReport::Applied {
            from_block,
            to_block,
            head,
            applied: events.len(),
            skipped,
        })
    }

    async fn apply(&self, event: &PaymentEvent) -> Result<(), RelayError> {
        let address = event.payer_key();

        tracing::info!(
            address = %address,
            amount = %event.amount,
            expiration = %event.new_expiration,
            expires_at = ?event.expires_at(),
            block = event.position.block_number,
            log_index = event.position.log_index,
            "Payment received"
        );

        let api_key = generate_api_key();
        let outcome = self
            .store
            .upsert(&address, &api_key, event.new_expiration)
            .await?;

        match outcome {
            UpsertOutcome::Inserted => tracing::info!(address = %address, "Credential issued"),
            UpsertOutcome::Updated => tracing::info!(address = %address, "Credential rotated"),
        }

        Ok(())
    }
}
