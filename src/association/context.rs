//! Presentation context negotiation and lookup.
//!
//! The association requester assigns odd context identifiers to its
//! abstract syntaxes; the acceptor answers each context with a result
//! and, on acceptance, a single transfer syntax. After the handshake
//! both sides hold the same table, queried by context ID for incoming
//! fragments and by abstract syntax for outgoing commands.

use snafu::{ensure, Backtrace, OptionExt, Snafu};

use crate::pdu::{
    PresentationContextProposed, PresentationContextResult, PresentationContextResultReason,
};
use crate::uids::trim_uid;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Presentation context {} was not negotiated", context_id))]
    ContextNotNegotiated {
        context_id: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("SOP class {} was not negotiated", abstract_syntax_uid))]
    SopClassNotNegotiated {
        abstract_syntax_uid: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Cannot propose {} presentation contexts, at most 128 fit", count))]
    TooManyContexts { count: usize, backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

/// One negotiated presentation context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedContext {
    /// the context identifier
    pub id: u8,
    /// the abstract syntax UID the context was proposed for
    pub abstract_syntax: String,
    /// the transfer syntax chosen by the acceptor
    /// (the first proposed one until the handshake completes)
    pub transfer_syntax: String,
    /// whether the acceptor accepted the context
    pub accepted: bool,
}

/// The per-association table of presentation contexts.
#[derive(Debug, Default)]
pub struct ContextManager {
    contexts: Vec<NegotiatedContext>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requester side: assign odd context IDs 1, 3, 5, … to the given
    /// abstract syntaxes and produce the proposed context items,
    /// each carrying the full transfer syntax list.
    pub fn propose(
        &mut self,
        abstract_syntaxes: &[String],
        transfer_syntaxes: &[String],
    ) -> Result<Vec<PresentationContextProposed>> {
        ensure!(
            abstract_syntaxes.len() <= 128,
            TooManyContextsSnafu {
                count: abstract_syntaxes.len()
            }
        );

        let proposed: Vec<_> = abstract_syntaxes
            .iter()
            .enumerate()
            .map(|(i, abstract_syntax)| PresentationContextProposed {
                id: (2 * i + 1) as u8,
                abstract_syntax: abstract_syntax.clone(),
                transfer_syntaxes: transfer_syntaxes.to_vec(),
            })
            .collect();

        self.contexts = proposed
            .iter()
            .map(|pc| NegotiatedContext {
                id: pc.id,
                abstract_syntax: pc.abstract_syntax.clone(),
                transfer_syntax: pc.transfer_syntaxes[0].clone(),
                accepted: false,
            })
            .collect();

        Ok(proposed)
    }

    /// Requester side: record the acceptor's answer.
    ///
    /// Results for context IDs which were never proposed are ignored
    /// with a warning, as are duplicate answers.
    pub fn apply_results(&mut self, results: &[PresentationContextResult]) {
        for result in results {
            match self.contexts.iter_mut().find(|c| c.id == result.id) {
                Some(context) => {
                    context.accepted =
                        result.reason == PresentationContextResultReason::Acceptance;
                    if context.accepted {
                        context.transfer_syntax = trim_uid(&result.transfer_syntax).to_string();
                    }
                }
                None => {
                    tracing::warn!(
                        "acceptor answered presentation context {} which was never proposed",
                        result.id
                    );
                }
            }
        }
    }

    /// Acceptor side: negotiate each requested context against the
    /// accept list and the supported transfer syntaxes, record the
    /// outcome, and produce the result items to send back.
    ///
    /// The chosen transfer syntax is the first one offered for the
    /// context which is also locally supported. Rejected contexts carry
    /// the first locally supported transfer syntax as filler, since the
    /// field is not significant in that case.
    pub fn negotiate(
        &mut self,
        requested: &[PresentationContextProposed],
        accepted_abstract_syntaxes: &[String],
        supported_transfer_syntaxes: &[String],
    ) -> Vec<PresentationContextResult> {
        let filler_syntax = supported_transfer_syntaxes
            .first()
            .cloned()
            .unwrap_or_else(|| crate::uids::IMPLICIT_VR_LITTLE_ENDIAN.to_string());

        let results: Vec<_> = requested
            .iter()
            .map(|pc| {
                let abstract_syntax = trim_uid(&pc.abstract_syntax);
                if !accepted_abstract_syntaxes
                    .iter()
                    .any(|a| a == abstract_syntax)
                {
                    return PresentationContextResult {
                        id: pc.id,
                        reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                        transfer_syntax: filler_syntax.clone(),
                    };
                }

                match pc
                    .transfer_syntaxes
                    .iter()
                    .map(|ts| trim_uid(ts))
                    .find(|ts| supported_transfer_syntaxes.iter().any(|s| s == ts))
                {
                    Some(transfer_syntax) => PresentationContextResult {
                        id: pc.id,
                        reason: PresentationContextResultReason::Acceptance,
                        transfer_syntax: transfer_syntax.to_string(),
                    },
                    None => PresentationContextResult {
                        id: pc.id,
                        reason: PresentationContextResultReason::TransferSyntaxesNotSupported,
                        transfer_syntax: filler_syntax.clone(),
                    },
                }
            })
            .collect();

        self.contexts = requested
            .iter()
            .zip(&results)
            .map(|(pc, result)| NegotiatedContext {
                id: pc.id,
                abstract_syntax: trim_uid(&pc.abstract_syntax).to_string(),
                transfer_syntax: trim_uid(&result.transfer_syntax).to_string(),
                accepted: result.reason == PresentationContextResultReason::Acceptance,
            })
            .collect();

        results
    }

    /// Look up an accepted context by its identifier,
    /// as required for incoming presentation data values.
    pub fn by_context_id(&self, context_id: u8) -> Result<&NegotiatedContext> {
        self.contexts
            .iter()
            .find(|c| c.accepted && c.id == context_id)
            .context(ContextNotNegotiatedSnafu { context_id })
    }

    /// Look up an accepted context by abstract syntax,
    /// as required for outgoing DIMSE messages.
    pub fn by_abstract_syntax(&self, abstract_syntax_uid: &str) -> Result<&NegotiatedContext> {
        self.contexts
            .iter()
            .find(|c| c.accepted && c.abstract_syntax == abstract_syntax_uid)
            .context(SopClassNotNegotiatedSnafu {
                abstract_syntax_uid,
            })
    }

    /// All negotiated contexts, accepted and rejected.
    pub fn contexts(&self) -> &[NegotiatedContext] {
        &self.contexts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uids;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn requester_ids_are_odd_and_unique() {
        let mut manager = ContextManager::new();
        let abstract_syntaxes = strings(&[
            uids::VERIFICATION,
            uids::CT_IMAGE_STORAGE,
            uids::MR_IMAGE_STORAGE,
        ]);
        let proposed = manager
            .propose(
                &abstract_syntaxes,
                &strings(&[uids::IMPLICIT_VR_LITTLE_ENDIAN]),
            )
            .unwrap();

        let ids: Vec<u8> = proposed.iter().map(|pc| pc.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        assert!(ids.iter().all(|id| id % 2 == 1));
    }

    #[test]
    fn acceptor_chooses_first_supported_transfer_syntax() {
        let mut manager = ContextManager::new();
        let requested = vec![PresentationContextProposed {
            id: 1,
            abstract_syntax: uids::VERIFICATION.to_string(),
            transfer_syntaxes: strings(&[
                "1.2.840.10008.1.2.4.50",
                uids::EXPLICIT_VR_LITTLE_ENDIAN,
                uids::IMPLICIT_VR_LITTLE_ENDIAN,
            ]),
        }];
        let results = manager.negotiate(
            &requested,
            &strings(&[uids::VERIFICATION]),
            &strings(&[
                uids::IMPLICIT_VR_LITTLE_ENDIAN,
                uids::EXPLICIT_VR_LITTLE_ENDIAN,
            ]),
        );

        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].reason,
            PresentationContextResultReason::Acceptance
        );
        // the first *offered* syntax that is also supported
        assert_eq!(results[0].transfer_syntax, uids::EXPLICIT_VR_LITTLE_ENDIAN);
    }

    #[test]
    fn acceptor_rejects_with_precise_reason() {
        let mut manager = ContextManager::new();
        let requested = vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: "1.2.999.1".to_string(),
                transfer_syntaxes: strings(&[uids::IMPLICIT_VR_LITTLE_ENDIAN]),
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: uids::VERIFICATION.to_string(),
                transfer_syntaxes: strings(&["1.2.840.10008.1.2.4.50"]),
            },
        ];
        let results = manager.negotiate(
            &requested,
            &strings(&[uids::VERIFICATION]),
            &strings(&[uids::IMPLICIT_VR_LITTLE_ENDIAN]),
        );

        assert_eq!(
            results[0].reason,
            PresentationContextResultReason::AbstractSyntaxNotSupported
        );
        assert_eq!(
            results[1].reason,
            PresentationContextResultReason::TransferSyntaxesNotSupported
        );
        assert!(manager.by_context_id(1).is_err());
        assert!(manager.by_context_id(3).is_err());
    }

    #[test]
    fn lookups_work_in_both_directions() {
        let mut manager = ContextManager::new();
        let proposed = manager
            .propose(
                &strings(&[uids::VERIFICATION, uids::CT_IMAGE_STORAGE]),
                &strings(&[uids::IMPLICIT_VR_LITTLE_ENDIAN]),
            )
            .unwrap();
        let results: Vec<_> = proposed
            .iter()
            .map(|pc| PresentationContextResult {
                id: pc.id,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: uids::IMPLICIT_VR_LITTLE_ENDIAN.to_string(),
            })
            .collect();
        manager.apply_results(&results);

        let context = manager.by_abstract_syntax(uids::CT_IMAGE_STORAGE).unwrap();
        assert_eq!(context.id, 3);
        let context = manager.by_context_id(1).unwrap();
        assert_eq!(context.abstract_syntax, uids::VERIFICATION);
        assert!(manager.by_abstract_syntax("1.2.999.1").is_err());
    }
}
