//! The dispatcher: owns a [`RoundState`], reacts to the merged event stream,
//! and executes the `enter*` state-machine transitions. Transitions invoke
//! each other synchronously (`enter_new_round -> enter_propose ->
//! enter_prevote`) — never re-queued through the event channel, which
//! would break the run-to-completion semantics a single dispatcher tick
//! relies on.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::backend::Backend;
use crate::block::ConsensusValue;
use crate::codec::{self, sign_bytes};
use crate::config::Config;
use crate::error::{fatal, FatalError, SendError};
use crate::events::{BlockFinalized, ConsensusEvent};
use crate::round_state::RoundState;
use crate::timer::{TimeoutFire, TimeoutKey, TimerService};
use crate::types::{
    BlockHash, Envelope, Height, Proposal, Round, RoundStep, ValidatorAddress, Vote, VoteKind,
};
use crate::validator_set::ValidatorSet;

/// A cheap, clonable-by-readers snapshot of the round state, published
/// after every tick completes. External observers (RPC, metrics, storage)
/// read this instead of touching the dispatcher's owned `RoundState`
/// directly, so the dispatcher never has to hold a lock while it is inside
/// a `Backend::sign`/`Backend::broadcast` call.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
    pub locked_round: Round,
    pub locked_block_hash: Option<BlockHash>,
    pub valid_round: Round,
    pub valid_block_hash: Option<BlockHash>,
    pub commit_round: Round,
}

/// Drives one validator's round state machine for a chain of heights.
pub struct Engine<B: ConsensusValue, BK: Backend<B>> {
    backend: BK,
    config: Config,
    timers: TimerService,
    timer_rx: mpsc::UnboundedReceiver<TimeoutFire>,
    state: RoundState<B>,
    validators: ValidatorSet,
    /// Anchor validator `calc_proposer` rotates from. Carried across rounds
    /// within a height and across heights (continuing the rotation from
    /// whoever proposed the block that was just committed).
    proposer_anchor: ValidatorAddress,
    finalized_tx: broadcast::Sender<BlockFinalized<B>>,
    snapshot: Arc<RwLock<StateSnapshot>>,
}

impl<B: ConsensusValue, BK: Backend<B>> Engine<B, BK> {
    pub fn new(backend: BK, config: Config, height: Height, genesis_proposer: ValidatorAddress) -> Self {
        let (timers, timer_rx) = TimerService::new();
        let validators = backend.validators(height);
        let start_time = chrono::Utc::now();
        let state = RoundState::new(height, start_time);
        let (finalized_tx, _) = broadcast::channel(64);

        let snapshot = Arc::new(RwLock::new(StateSnapshot {
            height,
            round: Round(0),
            step: RoundStep::NewHeight,
            locked_round: Round::NIL,
            locked_block_hash: None,
            valid_round: Round::NIL,
            valid_block_hash: None,
            commit_round: Round::NIL,
        }));

        Self {
            backend,
            config,
            timers,
            timer_rx,
            state,
            validators,
            proposer_anchor: genesis_proposer,
            finalized_tx,
            snapshot,
        }
    }

    /// A clonable handle observers can read from another thread without
    /// touching the dispatcher.
    pub fn state_snapshot_handle(&self) -> Arc<RwLock<StateSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    pub fn subscribe_finalized(&self) -> broadcast::Receiver<BlockFinalized<B>> {
        self.finalized_tx.subscribe()
    }

    fn publish_snapshot(&self) {
        let mut snapshot = self.snapshot.write();
        snapshot.height = self.state.height();
        snapshot.round = self.state.round();
        snapshot.step = self.state.step;
        snapshot.locked_round = self.state.locked_round;
        snapshot.locked_block_hash = self.state.locked_block.as_ref().map(|b| b.hash());
        snapshot.valid_round = self.state.valid_round;
        snapshot.valid_block_hash = self.state.valid_block.as_ref().map(|b| b.hash());
        snapshot.commit_round = self.state.commit_round;
    }

    // ---- Driving loop -----------------------------------------------

    /// Start height zero's round-zero timer and begin consuming events.
    /// `inbound` carries locally-assembled blocks and already-verified
    /// peer messages; timer fires arrive on the engine's own channel.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<ConsensusEvent<B>>) {
        self.start_round_zero();
        loop {
            tokio::select! {
                maybe_event = inbound.recv() => {
                    match maybe_event {
                        Some(event) => self.dispatch_inbound(event),
                        None => break,
                    }
                }
                maybe_fire = self.timer_rx.recv() => {
                    match maybe_fire {
                        Some(fire) => self.dispatch_timer(fire),
                        None => break,
                    }
                }
            }
            self.publish_snapshot();
        }
        self.stop();
    }

    /// Stop the dispatcher: releases any pending timeout without firing it.
    /// `run` calls this itself once its inbound channel closes (the
    /// embedder's way of unsubscribing the event stream); callers driving
    /// the synchronous `handle_event`/`handle_timer_fire` API directly may
    /// call this themselves once they're done feeding the engine events.
    pub fn stop(&mut self) {
        debug!("stopping dispatcher, abandoning pending timeouts");
        self.timers.stop();
    }

    /// Schedule the round-zero timer without entering the `run` loop.
    /// Exposed for callers (and tests) that want to drive the dispatcher
    /// one event at a time rather than handing it an `mpsc` stream.
    pub fn start(&mut self) {
        self.start_round_zero();
    }

    /// Feed a single inbound event synchronously and republish the
    /// snapshot. The asynchronous counterpart to this is what `run` does
    /// in its select loop.
    pub fn handle_event(&mut self, event: ConsensusEvent<B>) {
        self.dispatch_inbound(event);
        self.publish_snapshot();
    }

    /// Feed a single timer fire synchronously and republish the snapshot.
    pub fn handle_timer_fire(&mut self, fire: TimeoutFire) {
        self.dispatch_timer(fire);
        self.publish_snapshot();
    }

    /// Drain one pending timer fire, if any is ready without blocking.
    pub fn try_recv_timer_fire(&mut self) -> Option<TimeoutFire> {
        self.timer_rx.try_recv().ok()
    }

    pub fn round_state(&self) -> &RoundState<B> {
        &self.state
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    fn dispatch_inbound(&mut self, event: ConsensusEvent<B>) {
        match event {
            ConsensusEvent::NewBlock(block) => {
                trace!(height = ?self.state.height(), "local block assembled");
                self.state.block = Some(block);
            }
            ConsensusEvent::Proposal { proposal, proposer } => self.on_proposal(proposal, proposer),
            ConsensusEvent::Vote(vote) => self.on_vote(vote),
        }
    }

    fn dispatch_timer(&mut self, fire: TimeoutFire) {
        if !self.timers.is_current(&fire) {
            debug!(key = ?fire.key, "ignoring stale timer fire");
            return;
        }
        let TimeoutKey { height, round, step } = fire.key;
        match step {
            RoundStep::NewHeight => self.enter_new_round(height, Round(0)),
            RoundStep::Propose => self.enter_prevote(height, round),
            RoundStep::PrevoteWait => self.enter_precommit(height, round),
            RoundStep::PrecommitWait => self.enter_new_round(height, round.succ()),
            _ => debug!(?step, "timer fired for a step with no scheduled timeout"),
        }
    }

    // ---- Proposer / vote lookups --------------------------------------

    fn current_proposer(&self) -> Option<ValidatorAddress> {
        self.validators
            .calc_proposer(&self.proposer_anchor, self.state.round())
            .map(|v| v.address)
    }

    fn is_local_proposer(&self) -> bool {
        match (self.backend.address(), self.current_proposer()) {
            (Some(addr), Some(proposer)) => addr == proposer,
            _ => false,
        }
    }

    // ---- Message handlers ---------------------------------------------

    fn on_proposal(&mut self, proposal: Proposal<B>, proposer: ValidatorAddress) {
        if proposal.round != self.state.round() {
            debug!(
                got = ?proposal.round,
                current = ?self.state.round(),
                "ignoring proposal for a non-current round"
            );
            return;
        }
        let Some(expected) = self.current_proposer() else {
            debug!("no proposer computable for current round, ignoring proposal");
            return;
        };
        if proposer != expected {
            debug!(%proposer, %expected, "ignoring proposal from non-proposer");
            return;
        }
        if !proposal.pol_round.is_nil() && proposal.pol_round >= proposal.round {
            // `pol_round` is chosen and transmitted by the proposer over the
            // wire — a Byzantine proposer's malformed claim, not a locally
            // computed value. Drop it like any other guard rejection rather
            // than treating it as a fatal invariant violation (per §7 regime
            // 1; only checks against our own quorum-backed tallies belong in
            // the fatal regime).
            debug!(
                ?proposer,
                pol_round = ?proposal.pol_round,
                round = ?proposal.round,
                "ignoring proposal with out-of-range polRound"
            );
            return;
        }

        self.state.set_proposal(&proposal);
        info!(round = ?proposal.round, hash = %proposal.block.hash(), "proposal received");

        if self.state.step == RoundStep::Propose
            && self.state.is_proposal_complete(&self.validators)
        {
            self.enter_prevote(self.state.height(), self.state.round());
        } else if self.state.step == RoundStep::Commit {
            // We already decided to commit this round but were missing the
            // block itself; a late delivery (or a re-request) can still
            // complete the finalization that was postponed.
            self.finalize_commit(self.state.height());
        }
    }

    fn on_vote(&mut self, vote: Vote) {
        if vote.height != self.state.height() {
            debug!(got = ?vote.height, current = ?self.state.height(), "ignoring vote for a different height");
            return;
        }
        let round = vote.round;
        let kind = vote.vote_kind;

        let added = match kind {
            VoteKind::Prevote => self
                .state
                .prevotes_for(round, &self.validators)
                .add_vote(vote, &self.validators),
            VoteKind::Precommit => self
                .state
                .precommits_for(round, &self.validators)
                .add_vote(vote, &self.validators),
            VoteKind::Propose | VoteKind::Commit => {
                warn!(?kind, "on_vote received a non-vote kind, dropping");
                return;
            }
        };

        match added {
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "vote rejected");
                return;
            }
        }

        if round > self.state.round() {
            // Round-skip: if strictly more than 2/3 of the voting power has
            // moved on to a later round than ours (by either vote kind),
            // we're behind and should jump ahead rather than wait out our
            // own timers.
            let skip = match kind {
                VoteKind::Prevote => self
                    .state
                    .get_prevotes_by_round(round)
                    .is_some_and(|vs| vs.has_two_thirds_any(&self.validators)),
                VoteKind::Precommit => self
                    .state
                    .get_precommits_by_round(round)
                    .is_some_and(|vs| vs.has_two_thirds_any(&self.validators)),
                _ => false,
            };
            if skip {
                self.enter_new_round(self.state.height(), round);
            }
            return;
        }

        if round != self.state.round() {
            return;
        }

        match kind {
            VoteKind::Prevote => self.on_prevote_in_round(round),
            VoteKind::Precommit => self.on_precommit_in_round(round),
            _ => unreachable!(),
        }
    }

    fn on_prevote_in_round(&mut self, round: Round) {
        let prevotes = self.state.get_prevotes_by_round(round).expect("just inserted");
        match prevotes.two_thirds_majority(&self.validators) {
            Some(Some(hash)) => {
                // A polka updates valid_round/valid_block regardless of the
                // current step — it's independent from the locking decision
                // enter_precommit makes below.
                self.maybe_update_valid_value(round, hash);
                if self.state.step < RoundStep::Precommit {
                    self.enter_precommit(self.state.height(), round);
                }
            }
            Some(None) => {
                // A nil polka is just as decisive as a block polka: move to
                // precommit, where do_precommit handles the unlock.
                if self.state.step < RoundStep::Precommit {
                    self.enter_precommit(self.state.height(), round);
                }
            }
            None => {
                if self.state.step < RoundStep::PrevoteWait
                    && prevotes.has_two_thirds_any(&self.validators)
                {
                    self.enter_prevote_wait(self.state.height(), round);
                }
            }
        }
    }

    fn maybe_update_valid_value(&mut self, round: Round, hash: BlockHash) {
        if let Some(proposal) = &self.state.proposal_received {
            if proposal.block.hash() == hash {
                self.state.valid_round = round;
                self.state.valid_block = Some(proposal.block.clone());
            }
        }
    }

    fn on_precommit_in_round(&mut self, round: Round) {
        let precommits = self
            .state
            .get_precommits_by_round(round)
            .expect("just inserted");
        match precommits.two_thirds_majority(&self.validators) {
            Some(Some(_hash)) => {
                if self.state.step < RoundStep::Commit {
                    self.enter_commit(self.state.height(), round);
                }
            }
            _ => {
                if !self.state.precommit_waited
                    && self.state.step < RoundStep::PrecommitWait
                    && precommits.has_two_thirds_any(&self.validators)
                {
                    self.enter_precommit_wait(self.state.height(), round);
                }
            }
        }
    }

    // ---- enter* transitions --------------------------------------------

    fn uniform_guard(&self, h: Height, r: Round, target: RoundStep) -> bool {
        h == self.state.height()
            && r >= self.state.round()
            && !(r == self.state.round() && self.state.step >= target)
    }

    pub fn enter_new_round(&mut self, h: Height, r: Round) {
        let accept = h == self.state.height()
            && r >= self.state.round()
            && !(r == self.state.round() && self.state.step != RoundStep::NewHeight);
        if !accept {
            debug!(?h, ?r, step = ?self.state.step, "enterNewRound rejected");
            return;
        }

        if r > self.state.round() {
            debug!(?h, ?r, "advancing round");
            // A proposal belongs to the round it was delivered for; locked
            // and valid value/round are the only things that carry across
            // a round change.
            self.state.proposal_received = None;
        }
        self.state.view.round = r;
        self.state.step = RoundStep::NewRound;
        self.state.precommit_waited = false;

        self.enter_propose(h, r);
    }

    pub fn enter_propose(&mut self, h: Height, r: Round) {
        if !self.uniform_guard(h, r, RoundStep::Propose) {
            debug!(?h, ?r, step = ?self.state.step, "enterPropose rejected");
            return;
        }

        self.timers.schedule(
            TimeoutKey { height: h, round: r, step: RoundStep::Propose },
            self.config.propose_timeout(r),
        );

        if self.is_local_proposer() {
            if let Some(proposal) = self.decide_proposal(r) {
                let result = self.send_propose(&proposal);
                self.report_send_result("failed to send proposal", result);
                self.state.set_proposal(&proposal);
            } else {
                debug!("local node is proposer but has no candidate block yet");
            }
        }

        self.state.step = RoundStep::Propose;

        if self.state.is_proposal_complete(&self.validators) {
            self.enter_prevote(h, r);
        }
    }

    pub fn enter_prevote(&mut self, h: Height, r: Round) {
        if !self.uniform_guard(h, r, RoundStep::Prevote) {
            debug!(?h, ?r, step = ?self.state.step, "enterPrevote rejected");
            return;
        }
        self.do_prevote(r);
        self.state.step = RoundStep::Prevote;
    }

    pub fn enter_prevote_wait(&mut self, h: Height, r: Round) {
        if !self.uniform_guard(h, r, RoundStep::PrevoteWait) {
            debug!(?h, ?r, step = ?self.state.step, "enterPrevoteWait rejected");
            return;
        }
        let has_any = self
            .state
            .get_prevotes_by_round(r)
            .is_some_and(|vs| vs.has_two_thirds_any(&self.validators));
        if !has_any {
            fatal(FatalError::PrevoteWaitWithoutQuorum { round: r });
        }
        self.timers.schedule(
            TimeoutKey { height: h, round: r, step: RoundStep::PrevoteWait },
            self.config.prevote_timeout(r),
        );
        self.state.step = RoundStep::PrevoteWait;
    }

    pub fn enter_precommit(&mut self, h: Height, r: Round) {
        if !self.uniform_guard(h, r, RoundStep::Precommit) {
            debug!(?h, ?r, step = ?self.state.step, "enterPrecommit rejected");
            return;
        }
        self.do_precommit(r);
        self.state.step = RoundStep::Precommit;
    }

    pub fn enter_precommit_wait(&mut self, h: Height, r: Round) {
        if !self.uniform_guard(h, r, RoundStep::PrecommitWait) {
            debug!(?h, ?r, step = ?self.state.step, "enterPrecommitWait rejected");
            return;
        }
        if self.state.precommit_waited {
            debug!(?h, ?r, "precommit wait already scheduled this round");
            return;
        }
        let has_any = self
            .state
            .get_precommits_by_round(r)
            .is_some_and(|vs| vs.has_two_thirds_any(&self.validators));
        if !has_any {
            fatal(FatalError::PrecommitWaitWithoutQuorum { round: r });
        }
        self.timers.schedule(
            TimeoutKey { height: h, round: r, step: RoundStep::PrecommitWait },
            self.config.precommit_timeout(r),
        );
        self.state.precommit_waited = true;
        self.state.step = RoundStep::PrecommitWait;
    }

    /// `commit_round` is a round number, not necessarily the current round
    /// — the corrected guard (see REDESIGN FLAGS) only checks height and
    /// that we haven't already committed.
    pub fn enter_commit(&mut self, h: Height, commit_round: Round) {
        let accept = h == self.state.height() && self.state.step < RoundStep::Commit;
        if !accept {
            debug!(?h, ?commit_round, step = ?self.state.step, "enterCommit rejected");
            return;
        }

        let majority = self
            .state
            .get_precommits_by_round(commit_round)
            .and_then(|vs| vs.two_thirds_majority(&self.validators));

        let Some(hash_opt) = majority else {
            fatal(FatalError::CommitWithoutMajority { round: commit_round });
        };

        self.state.step = RoundStep::Commit;
        self.state.commit_round = commit_round;
        self.state.commit_time = Some(chrono::Utc::now());

        if let Some(hash) = hash_opt {
            self.align_proposal_at_commit(commit_round, hash);
        }

        info!(?h, ?commit_round, "entering commit");
        self.finalize_commit(h);
    }

    fn align_proposal_at_commit(&mut self, commit_round: Round, hash: BlockHash) {
        if let Some(locked) = &self.state.locked_block {
            if locked.hash() == hash {
                self.state.proposal_received = Some(crate::round_state::ReceivedProposal {
                    block: locked.clone(),
                    round: commit_round,
                    pol_round: Round::NIL,
                });
                return;
            }
        }
        if let Some(received) = &self.state.proposal_received {
            if received.block.hash() != hash {
                debug!("clearing stale proposal at commit, awaiting matching delivery");
                self.state.proposal_received = None;
            }
        }
    }

    // ---- Finalization ----------------------------------------------------

    pub fn finalize_commit(&mut self, h: Height) {
        if self.state.step != RoundStep::Commit {
            fatal(FatalError::FinalizeWrongStep { step: self.state.step });
        }
        if h != self.state.height() {
            fatal(FatalError::FinalizeWrongHeight { expected: self.state.height(), got: h });
        }

        let commit_round = self.state.commit_round;
        let majority = self
            .state
            .get_precommits_by_round(commit_round)
            .and_then(|vs| vs.two_thirds_majority(&self.validators));
        let Some(Some(hash)) = majority else {
            fatal(FatalError::CommitWithoutMajority { round: commit_round });
        };

        let Some(received) = &self.state.proposal_received else {
            info!(%hash, "finalization postponed: awaiting matching proposal delivery");
            return;
        };
        if received.block.hash() != hash {
            info!(%hash, "finalization postponed: proposal on hand does not match committed hash");
            return;
        }

        let block = received.block.clone();
        let seal = codec::committed_seal(&hash);
        trace!(seal = %hex::encode(seal), "computed committed seal");

        let _ = self.finalized_tx.send(BlockFinalized { height: h, block });
        info!(%hash, height = ?h, "block finalized");

        self.update_state_for_new_height();
        self.start_round_zero();
    }

    fn update_state_for_new_height(&mut self) {
        let next_height = self.state.height().next();

        self.proposer_anchor = self
            .current_proposer()
            .unwrap_or(self.proposer_anchor);

        let start_time = match self.state.commit_time {
            Some(commit_time) => commit_time + self.config.commit_delay(),
            None => chrono::Utc::now() + self.config.commit_delay(),
        };

        self.state = RoundState::new(next_height, start_time);
        self.validators = self.backend.validators(next_height);
    }

    fn start_round_zero(&mut self) {
        let now = chrono::Utc::now();
        let delay = (self.state.start_time - now)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.timers.schedule(
            TimeoutKey {
                height: self.state.height(),
                round: Round(0),
                step: RoundStep::NewHeight,
            },
            delay,
        );
    }

    // ---- Decision functions --------------------------------------------

    fn decide_proposal(&self, round: Round) -> Option<Proposal<B>> {
        if !self.state.valid_round.is_nil() {
            return Some(Proposal {
                block: self.state.valid_block.clone()?,
                round,
                pol_round: self.state.valid_round,
            });
        }
        Some(Proposal {
            block: self.state.block.clone()?,
            round,
            pol_round: Round::NIL,
        })
    }

    fn do_prevote(&mut self, round: Round) {
        let result = if !self.state.locked_round.is_nil() {
            let block = self.state.locked_block.clone();
            self.send_vote(VoteKind::Prevote, block.as_ref(), round)
        } else if let Some(received) = &self.state.proposal_received {
            let block = received.block.clone();
            self.send_vote(VoteKind::Prevote, Some(&block), round)
        } else {
            self.send_vote(VoteKind::Prevote, None, round)
        };
        self.report_send_result("failed to send prevote", result);
    }

    fn do_precommit(&mut self, round: Round) {
        let majority = self
            .state
            .get_prevotes_by_round(round)
            .and_then(|vs| vs.two_thirds_majority(&self.validators));

        let result = match majority {
            None => {
                // No polka at all this round: stay locked (if we are), precommit nil.
                self.send_vote(VoteKind::Precommit, None, round)
            }
            Some(None) => {
                // Polka for nil: unlock if locked, precommit nil.
                if !self.state.locked_round.is_nil() {
                    self.state.unlock();
                }
                self.send_vote(VoteKind::Precommit, None, round)
            }
            Some(Some(hash)) => {
                let locked_matches = self
                    .state
                    .locked_block
                    .as_ref()
                    .is_some_and(|b| b.hash() == hash);
                let proposal_matches = self
                    .state
                    .proposal_received
                    .as_ref()
                    .is_some_and(|p| p.block.hash() == hash);

                if locked_matches {
                    self.state.locked_round = round;
                    let block = self.state.locked_block.clone();
                    self.send_vote(VoteKind::Precommit, block.as_ref(), round)
                } else if proposal_matches {
                    let block = self.state.proposal_received.as_ref().unwrap().block.clone();
                    self.state.locked_round = round;
                    self.state.locked_block = Some(block.clone());
                    self.send_vote(VoteKind::Precommit, Some(&block), round)
                } else {
                    // Polka for a block we don't have locally available.
                    self.state.unlock();
                    self.send_vote(VoteKind::Precommit, None, round)
                }
            }
        };
        self.report_send_result("failed to send precommit", result);
    }

    // ---- Outbound message construction ---------------------------------

    fn send_propose(&mut self, proposal: &Proposal<B>) -> Result<(), SendError> {
        let Some(address) = self.backend.address() else {
            debug!("no local address, skipping proposal broadcast");
            return Ok(());
        };

        let payload = codec::encode_payload(proposal)?;
        let pre_image = sign_bytes(VoteKind::Propose, &payload, &address);
        let signature = self.backend.sign(&pre_image)?;
        let envelope = Envelope {
            code: VoteKind::Propose,
            payload,
            address,
            signature,
        };
        self.backend.broadcast(&self.validators, &envelope)?;
        Ok(())
    }

    /// Log-and-drop a failed send: the decision behind it is already
    /// recorded in `RoundState`, so there is nothing to roll back.
    fn report_send_result(&self, context: &'static str, result: Result<(), SendError>) {
        if let Err(err) = result {
            tracing::error!(error = %err, context, "abandoning send");
        }
    }

    fn send_vote(&mut self, kind: VoteKind, block: Option<&B>, round: Round) -> Result<(), SendError> {
        let Some(address) = self.backend.address() else {
            debug!("no local address, skipping vote broadcast");
            return Ok(());
        };
        if self.validators.get_by_address(&address).is_none() {
            debug!(%address, "local validator not in current set, skipping vote");
            return Ok(());
        }

        let block_hash = block.map(|b| b.hash());
        let vote = Vote {
            vote_kind: kind,
            height: self.state.height(),
            round,
            block_hash,
            validator: address,
        };

        // Record our own vote locally before attempting to broadcast it —
        // our own tally must reflect our intent regardless of network
        // delivery outcome.
        let record_result = match kind {
            VoteKind::Prevote => self
                .state
                .prevotes_for(round, &self.validators)
                .add_vote(vote.clone(), &self.validators),
            VoteKind::Precommit => self
                .state
                .precommits_for(round, &self.validators)
                .add_vote(vote.clone(), &self.validators),
            _ => unreachable!("send_vote only constructs Prevote/Precommit"),
        };
        if let Err(err) = record_result {
            tracing::error!(error = %err, "failed to record our own vote locally");
        }

        let payload = codec::encode_payload(&vote)?;
        let pre_image = sign_bytes(kind, &payload, &address);
        let signature = self.backend.sign(&pre_image)?;
        let envelope = Envelope {
            code: kind,
            payload,
            address,
            signature,
        };
        self.backend.broadcast(&self.validators, &envelope)?;
        Ok(())
    }
}
