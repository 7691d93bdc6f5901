use std::sync::Arc;

use escrow_automation_adapters::{AdapterError, CreateEscrowRequest, OnchainEscrow, Operation};
use escrow_automation_types::{
    Escrow, EscrowStatus, EventKind, ExternalTransaction, Payment, PaymentId, PaymentStatus,
    PaymentTrigger, RailTransactionKind, RailTransactionStatus, TriggerSource,
};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::{
    classify_adapter_error, escrow_reference, AttemptReport, EscrowCreationState, FlowProgress,
    OrchestratorContext, OrchestratorError, WithdrawalState,
};

/// Statuses escrow creation acts on
const ELIGIBLE: [PaymentStatus; 2] = [PaymentStatus::Funded, PaymentStatus::Processing];

/// Turns a funded payment into a funded on-chain escrow
///
/// One attempt walks the whole sequence: contract pause check, custodial balance check,
/// bridge withdrawal, bridge balance check, create-and-fund. Each completed step is in the
/// ledger, so a later attempt (from this process or another) resumes where the last one
/// stopped instead of repeating money movement.
pub struct EscrowCreationOrchestrator {
    ctx: Arc<OrchestratorContext>,
}

impl EscrowCreationOrchestrator {
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        Self { ctx }
    }

    /// Run one escrow creation attempt
    pub async fn run(
        &self,
        payment_id: PaymentId,
        trigger: TriggerSource,
        now: u64,
    ) -> Result<AttemptReport, OrchestratorError> {
        self.ctx
            .attempt(payment_id, trigger, now, &ELIGIBLE, || {
                self.drive(payment_id, now)
            })
            .await
    }

    async fn drive(&self, payment_id: PaymentId, now: u64) -> Result<PaymentStatus, OrchestratorError> {
        let ctx = &self.ctx;
        let payment = ctx.payment(payment_id).await?;
        if !ELIGIBLE.contains(&payment.status) {
            return Ok(payment.status);
        }

        let mut escrow = ctx.escrow(payment_id).await?;
        let period = self.validate_custody_period(&escrow)?;
        self.ensure_not_paused().await?;

        if payment.status == PaymentStatus::Funded {
            ctx.transition(
                payment_id,
                PaymentStatus::Funded,
                PaymentTrigger::EscrowCreationStarted {
                    onchain_escrow_exists: escrow.is_on_chain(),
                },
                now,
            )
            .await?;
            ctx.record(
                payment_id,
                EventKind::EscrowCreationStarted,
                format!("escrow creation started for {}", escrow.custody_amount),
                None,
                now,
            )
            .await?;
        }

        let progress = ctx.progress(payment_id).await?;
        let onchain = if progress.escrow_created() {
            None
        } else {
            Some(self.obtain_escrow(&payment, &mut escrow, &progress, period, now).await?)
        };

        self.finalize(&payment, escrow, onchain, now).await
    }

    /// Reject custody periods that would put the deadline in the past or too close to now
    fn validate_custody_period(&self, escrow: &Escrow) -> Result<u64, OrchestratorError> {
        let min = self.ctx.config.min_custody_period_secs;
        let period = escrow.custody_period_secs;
        if period < min || period <= 0 {
            return Err(OrchestratorError::DataIntegrityFault(format!(
                "custody period of {period}s is below the minimum of {min}s"
            )));
        }
        u64::try_from(period).map_err(|_| {
            OrchestratorError::DataIntegrityFault(format!("custody period {period} out of range"))
        })
    }

    async fn ensure_not_paused(&self) -> Result<(), OrchestratorError> {
        let paused = self
            .ctx
            .call_checked(Operation::IsPaused, self.ctx.chain.is_paused())
            .await?;
        if paused {
            info!("escrow contract paused; deferring escrow creation");
            return Err(OrchestratorError::ContractPaused);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ON-CHAIN ESCROW
    // ═══════════════════════════════════════════════════════════════════════════

    async fn obtain_escrow(
        &self,
        payment: &Payment,
        escrow: &mut Escrow,
        progress: &FlowProgress,
        period: u64,
        now: u64,
    ) -> Result<OnchainEscrow, OrchestratorError> {
        // A previous submission may have landed without us seeing the reply
        if matches!(
            progress.escrow,
            EscrowCreationState::Submitted | EscrowCreationState::OutcomeUnknown
        ) {
            if let Some(found) = self.find_existing(payment.id).await? {
                info!(
                    escrow_id = %found.escrow_id,
                    "escrow from an earlier submission found on chain"
                );
                return Ok(found);
            }
        }

        self.ensure_withdrawal(payment.id, escrow.custody_amount, progress, now)
            .await?;
        self.ensure_bridge_balance(escrow.custody_amount).await?;
        self.create_on_chain(escrow, period, now).await
    }

    async fn find_existing(&self, payment_id: PaymentId) -> Result<Option<OnchainEscrow>, OrchestratorError> {
        let reference = escrow_reference(payment_id);
        self.ctx
            .call_checked(Operation::FindEscrow, self.ctx.chain.find_escrow(&reference))
            .await
    }

    async fn ensure_bridge_balance(&self, needed: Decimal) -> Result<(), OrchestratorError> {
        let available = self
            .ctx
            .call_checked(Operation::BridgeBalance, self.ctx.chain.bridge_balance())
            .await?;
        if available < needed {
            return Err(OrchestratorError::InsufficientBalance {
                operation: Operation::BridgeBalance,
                needed,
                available,
            });
        }
        Ok(())
    }

    async fn create_on_chain(
        &self,
        escrow: &mut Escrow,
        period: u64,
        now: u64,
    ) -> Result<OnchainEscrow, OrchestratorError> {
        let ctx = &self.ctx;
        let payment_id = escrow.payment_id;
        let reference = escrow_reference(payment_id);

        let custody_end = now.saturating_add(period);
        escrow.custody_end = Some(custody_end);
        escrow.updated_at = now;
        ctx.store.update_escrow(escrow).await?;

        ctx.record(
            payment_id,
            EventKind::EscrowCreationSubmitted,
            format!("creating escrow for {} until {custody_end}", escrow.custody_amount),
            Some(&reference),
            now,
        )
        .await?;

        let request = CreateEscrowRequest {
            custody_amount: escrow.custody_amount,
            custody_percent: escrow.custody_percent,
            custody_end,
            reference: reference.clone(),
        };
        match ctx
            .call(Operation::CreateAndFund, ctx.chain.create_and_fund(&request))
            .await
        {
            Ok(onchain) => Ok(onchain),
            Err(AdapterError::Duplicate { existing_ref }) => {
                ctx.record(
                    payment_id,
                    EventKind::DuplicateOperation,
                    format!("escrow {reference} already exists on chain"),
                    Some(&existing_ref),
                    now,
                )
                .await?;
                self.find_existing(payment_id).await?.ok_or_else(|| {
                    OrchestratorError::Unrecoverable(format!(
                        "chain reports escrow {existing_ref} for {reference} but cannot find it"
                    ))
                })
            }
            Err(err) => Err(classify_adapter_error(Operation::CreateAndFund, err)),
        }
    }

    /// Persist the on-chain escrow and move the payment to `escrowed`
    async fn finalize(
        &self,
        payment: &Payment,
        mut escrow: Escrow,
        onchain: Option<OnchainEscrow>,
        now: u64,
    ) -> Result<PaymentStatus, OrchestratorError> {
        let ctx = &self.ctx;

        if let Some(onchain) = onchain {
            escrow.onchain_escrow_id = Some(onchain.escrow_id.clone());
            escrow.blockchain_tx_hash = Some(onchain.tx_hash.clone());
            if escrow.status == EscrowStatus::Pending {
                escrow.status = escrow.status.transition(EscrowStatus::Active)?;
            }
            escrow.updated_at = now;
            ctx.store.update_escrow(&escrow).await?;
            ctx.record(
                payment.id,
                EventKind::EscrowCreated,
                format!("escrow {} funded in {}", onchain.escrow_id, onchain.tx_hash),
                Some(&onchain.escrow_id),
                now,
            )
            .await?;
        }

        let (Some(tx_hash), Some(custody_end)) =
            (escrow.blockchain_tx_hash.clone(), escrow.custody_end)
        else {
            return Err(OrchestratorError::DataIntegrityFault(format!(
                "escrow {} recorded as created without transaction hash or deadline",
                escrow.id
            )));
        };

        let status = ctx
            .transition(
                payment.id,
                PaymentStatus::Processing,
                PaymentTrigger::EscrowFunded {
                    tx_hash,
                    custody_end,
                    now,
                },
                now,
            )
            .await?;
        info!(
            onchain_escrow_id = escrow.onchain_escrow_id.as_deref().unwrap_or_default(),
            custody_end,
            "escrow funded"
        );
        Ok(status)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BRIDGE WITHDRAWAL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Make sure the custody amount has been withdrawn to the bridge wallet
    async fn ensure_withdrawal(
        &self,
        payment_id: PaymentId,
        amount: Decimal,
        progress: &FlowProgress,
        now: u64,
    ) -> Result<String, OrchestratorError> {
        let reference = match &progress.withdrawal {
            WithdrawalState::Confirmed { reference } => return Ok(reference.clone()),
            WithdrawalState::Initiated { reference } => reference.clone(),
            // The reply was lost; the same key makes the rail return the original transfer
            WithdrawalState::Submitted { key } => {
                self.submit_withdrawal(payment_id, amount, key, now).await?
            }
            WithdrawalState::None | WithdrawalState::Failed { .. } => {
                let available = self
                    .ctx
                    .call_checked(Operation::CustodialBalance, self.ctx.fiat.custodial_balance())
                    .await?;
                if available < amount {
                    return Err(OrchestratorError::InsufficientBalance {
                        operation: Operation::Withdraw,
                        needed: amount,
                        available,
                    });
                }

                let key = progress.withdrawal_key(payment_id);
                self.ctx
                    .record(
                        payment_id,
                        EventKind::BridgeWithdrawalSubmitted,
                        format!("withdrawing {amount} to the bridge wallet"),
                        Some(&key),
                        now,
                    )
                    .await?;
                self.submit_withdrawal(payment_id, amount, &key, now).await?
            }
        };

        self.confirm_withdrawal(payment_id, &reference, amount, now)
            .await?;
        Ok(reference)
    }

    async fn submit_withdrawal(
        &self,
        payment_id: PaymentId,
        amount: Decimal,
        key: &str,
        now: u64,
    ) -> Result<String, OrchestratorError> {
        let ctx = &self.ctx;
        let result = ctx
            .call(
                Operation::Withdraw,
                ctx.fiat.withdraw(
                    amount,
                    &ctx.config.custodial_account,
                    &ctx.config.bridge_wallet,
                    key,
                ),
            )
            .await;

        let reference = match result {
            Ok(reference) => reference,
            Err(AdapterError::Duplicate { existing_ref }) => {
                debug!(key, existing_ref = %existing_ref, "withdrawal key already used");
                ctx.record(
                    payment_id,
                    EventKind::DuplicateOperation,
                    format!("withdrawal {key} already submitted"),
                    Some(&existing_ref),
                    now,
                )
                .await?;
                existing_ref
            }
            Err(err) => return Err(classify_adapter_error(Operation::Withdraw, err)),
        };

        ctx.store
            .upsert_external_transaction(&ExternalTransaction::new(
                reference.as_str(),
                RailTransactionKind::Withdrawal,
                Some(payment_id),
                amount,
                RailTransactionStatus::Pending,
                now,
            ))
            .await?;
        ctx.record(
            payment_id,
            EventKind::BridgeWithdrawalInitiated,
            format!("withdrawal {reference} initiated"),
            Some(&reference),
            now,
        )
        .await?;
        Ok(reference)
    }

    async fn confirm_withdrawal(
        &self,
        payment_id: PaymentId,
        reference: &str,
        amount: Decimal,
        now: u64,
    ) -> Result<(), OrchestratorError> {
        let ctx = &self.ctx;
        let transfer = ctx
            .call_checked(Operation::GetTransaction, ctx.fiat.get_transaction(reference))
            .await?;

        let mirror = ExternalTransaction::new(
            reference,
            RailTransactionKind::Withdrawal,
            Some(payment_id),
            amount,
            transfer.status,
            now,
        );
        match transfer.status {
            RailTransactionStatus::Completed => {
                ctx.store.upsert_external_transaction(&mirror).await?;
                ctx.record(
                    payment_id,
                    EventKind::BridgeWithdrawalConfirmed,
                    format!("withdrawal {reference} settled"),
                    Some(reference),
                    now,
                )
                .await?;
                Ok(())
            }
            // Funds have not reached the bridge yet
            RailTransactionStatus::Pending => Err(OrchestratorError::InsufficientBalance {
                operation: Operation::Withdraw,
                needed: amount,
                available: Decimal::ZERO,
            }),
            RailTransactionStatus::Failed => {
                warn!(reference, "withdrawal failed on the rail");
                ctx.store.upsert_external_transaction(&mirror).await?;
                Err(OrchestratorError::WithdrawalFailed {
                    external_ref: reference.to_string(),
                })
            }
        }
    }
}
