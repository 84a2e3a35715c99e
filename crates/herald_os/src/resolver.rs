#![forbid(unsafe_code)]

use herald_engines::envelope::{DecryptFailure, EnvelopeCipher, EnvelopeError};
use herald_kernel_contracts::directory::{Pseudonym, UserId, UserRecord};
use herald_kernel_contracts::dispatch::{ChannelAddress, ResolvedRecipient};
use herald_storage::repo::UserDirectoryRepo;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvableReason {
    MissingCiphertext,
    DecryptionFailed(DecryptFailure),
    MalformedAddress,
}

impl UnresolvableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnresolvableReason::MissingCiphertext => "missing_ciphertext",
            UnresolvableReason::DecryptionFailed(_) => "decryption_failed",
            UnresolvableReason::MalformedAddress => "malformed_address",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("recipient {user_id} is unresolvable ({})", .reason.as_str())]
pub struct UnresolvableRecipient {
    pub user_id: UserId,
    pub reason: UnresolvableReason,
}

/// Why a partner address was left off. Never fails the primary recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerMiss {
    NotFound,
    Unaddressable(UnresolvableReason),
    DirectoryError,
}

impl PartnerMiss {
    pub fn as_str(self) -> &'static str {
        match self {
            PartnerMiss::NotFound => "not_found",
            PartnerMiss::Unaddressable(reason) => reason.as_str(),
            PartnerMiss::DirectoryError => "directory_error",
        }
    }
}

/// Turns directory rows into addressable recipients. Plaintext addresses
/// exist only inside the returned value.
#[derive(Debug, Clone, Copy)]
pub struct RecipientResolver<'a> {
    cipher: &'a EnvelopeCipher,
}

impl<'a> RecipientResolver<'a> {
    pub fn new(cipher: &'a EnvelopeCipher) -> Self {
        Self { cipher }
    }

    pub fn resolve<D>(
        &self,
        directory: &D,
        user: &UserRecord,
    ) -> Result<ResolvedRecipient, UnresolvableRecipient>
    where
        D: UserDirectoryRepo + ?Sized,
    {
        let address = self.resolve_primary(user)?;
        let partner = match &user.partner_pseudonym {
            None => None,
            Some(partner) => match self.resolve_partner(directory, partner) {
                Ok((partner_id, partner_address)) => {
                    debug!(user_id = %user.id, partner_user_id = %partner_id, "partner attached");
                    Some(partner_address)
                }
                Err(miss) => {
                    warn!(
                        user_id = %user.id,
                        reason = miss.as_str(),
                        "partner unresolved; continuing without partner"
                    );
                    None
                }
            },
        };
        Ok(ResolvedRecipient::new(user.id, address, partner))
    }

    /// Primary address only. Used where partners are irrelevant.
    pub fn resolve_primary(&self, user: &UserRecord) -> Result<ChannelAddress, UnresolvableRecipient> {
        self.decode_address(user).map_err(|reason| UnresolvableRecipient {
            user_id: user.id,
            reason,
        })
    }

    fn resolve_partner<D>(
        &self,
        directory: &D,
        partner: &Pseudonym,
    ) -> Result<(UserId, ChannelAddress), PartnerMiss>
    where
        D: UserDirectoryRepo + ?Sized,
    {
        let record = match directory.find_by_pseudonym(partner) {
            Ok(Some(record)) => record,
            Ok(None) => return Err(PartnerMiss::NotFound),
            Err(err) => {
                debug!(error = %err, "partner lookup failed");
                return Err(PartnerMiss::DirectoryError);
            }
        };
        let address = self
            .decode_address(&record)
            .map_err(PartnerMiss::Unaddressable)?;
        Ok((record.id, address))
    }

    fn decode_address(&self, user: &UserRecord) -> Result<ChannelAddress, UnresolvableReason> {
        let envelope = user
            .channel_id_ciphertext
            .as_deref()
            .ok_or(UnresolvableReason::MissingCiphertext)?;
        let plaintext = Zeroizing::new(self.cipher.decrypt(envelope).map_err(|err| match err {
            EnvelopeError::DecryptionFailed(failure) => {
                UnresolvableReason::DecryptionFailed(failure)
            }
            EnvelopeError::EncryptionFailed => {
                UnresolvableReason::DecryptionFailed(DecryptFailure::Authentication)
            }
        })?);
        ChannelAddress::parse(&plaintext).map_err(|_| UnresolvableReason::MalformedAddress)
    }
}
