use qcn_common::Ticks;

use crate::{ShapeError, TbfParams};

/// Result of [`TokenBucket::try_release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The packet may be sent now. Its tokens have been consumed.
    Ready,
    /// Not enough tokens until `retry_at`.
    NotReady { retry_at: Ticks },
}

/// Committed and peak token buckets.
///
/// Tokens are kept in ticks: a bucket holding `t` tokens can send as many bytes as the rate
/// transmits in `t` ticks. Neither count ever exceeds its depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucket {
    params: TbfParams,
    /// Committed tokens, at most `params.buffer`.
    tokens: Ticks,
    /// Peak tokens, at most `params.mtu`. Unused without a peak rate.
    ptokens: Ticks,
    /// Last checkpoint.
    t_c: Ticks,
}

impl TokenBucket {
    /// Creates full buckets, checkpointed at `now`.
    pub fn new(params: TbfParams, now: Ticks) -> Self {
        let mut bucket = Self { params, tokens: 0, ptokens: 0, t_c: 0 };
        bucket.reset(now);
        bucket
    }

    /// Checks whether a packet of `len` bytes can ever be released.
    #[inline]
    pub fn admit(&self, len: u32) -> Result<(), ShapeError> {
        if len > self.params.max_size {
            return Err(ShapeError::ReshapeFail { len, max_size: self.params.max_size });
        }

        Ok(())
    }

    /// Refills both buckets up to `now` and tries to take the tokens for a `len` byte packet.
    ///
    /// On [`Release::Ready`] the refill and the charge are committed. Otherwise nothing
    /// changes and `retry_at` is the earliest time both buckets could cover the packet.
    pub fn try_release(&mut self, len: u32, now: Ticks) -> Release {
        let elapsed = (now - self.t_c).clamp(0, self.params.buffer);

        let mut ptoks = 0;
        if let Some(ptab) = &self.params.ptab {
            ptoks = elapsed.saturating_add(self.ptokens).min(self.params.mtu) - ptab.l2t(len);
        }

        let toks =
            elapsed.saturating_add(self.tokens).min(self.params.buffer) - self.params.rtab.l2t(len);

        if toks >= 0 && ptoks >= 0 {
            self.t_c = now;
            self.tokens = toks;
            self.ptokens = ptoks;
            return Release::Ready;
        }

        Release::NotReady { retry_at: now.saturating_add((-toks).max(-ptoks)) }
    }

    /// Fills both buckets and checkpoints at `now`.
    pub fn reset(&mut self, now: Ticks) {
        self.tokens = self.params.buffer;
        self.ptokens = self.params.mtu;
        self.t_c = now;
    }

    /// Replaces the parameters and starts over with full buckets.
    pub fn reconfigure(&mut self, params: TbfParams, now: Ticks) {
        self.params = params;
        self.reset(now);
    }

    pub fn params(&self) -> &TbfParams {
        &self.params
    }

    pub fn tokens(&self) -> Ticks {
        self.tokens
    }

    pub fn peak_tokens(&self) -> Ticks {
        self.ptokens
    }

    pub fn checkpoint(&self) -> Ticks {
        self.t_c
    }
}
