//! Instruction-derived strategy.
//!
//! Some launchpads emit no creation event; the only trace in the logs is
//! the instruction name. Extraction runs in two phases:
//!
//! 1. [`InstructionExtractor::matches_invocation`] pattern-matches the log
//!    batch, with no network access.
//! 2. [`InstructionExtractor::extract`] fetches the transaction, finds the
//!    program's instruction by discriminator, reads accounts by position and
//!    resolves metadata through an ordered list of [`MetadataTier`]s.

use std::sync::Arc;

use chainwatch_core::{
    ChainClient, CompiledInstruction, CreationEvent, CreationFields, SourceTag, Transaction,
};

use crate::coder::{instruction_discriminator, Discriminator};
use crate::error::DecodeError;
use crate::schema::{DecodeOutcome, InstructionSchema};

/// Raydium Launchlab program.
pub const LAUNCHLAB_PROGRAM_ID: &str = "LanMV9sAd7wArD4vJFi2qDdfnVhFxYSUg6eADduJ3uj";

/// Where the creation data lives in the target instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionLayout {
    pub program_id: String,
    /// Name as logged: `Program log: Instruction: <log_name>`.
    pub log_name: String,
    /// IDL instruction name used for schema decoding.
    pub schema_instruction: String,
    /// IDL argument holding `{ name, symbol, uri }`.
    pub metadata_arg: String,
    pub discriminator: Discriminator,
    pub mint_index: usize,
    pub pool_index: usize,
    pub creator_index: usize,
    pub min_accounts: usize,
    pub description: String,
    pub fallback_name_prefix: String,
    pub fallback_symbol_prefix: String,
}

impl Default for InstructionLayout {
    fn default() -> Self {
        Self {
            program_id: LAUNCHLAB_PROGRAM_ID.into(),
            log_name: "Initialize".into(),
            schema_instruction: "initialize".into(),
            metadata_arg: "baseMintParam".into(),
            discriminator: instruction_discriminator("initialize"),
            mint_index: 1,
            pool_index: 4,
            creator_index: 6,
            min_accounts: 8,
            description: "New token launched on Raydium Launchlab".into(),
            fallback_name_prefix: "Launchlab Token ".into(),
            fallback_symbol_prefix: "LL".into(),
        }
    }
}

// ─── Metadata tiers ──────────────────────────────────────────────────────────

/// Token metadata resolved by a tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub uri: Option<String>,
    /// Synthesized from the mint rather than decoded.
    pub synthetic: bool,
}

/// Outcome of one metadata tier.
#[derive(Debug)]
pub enum TierOutcome {
    Resolved(TokenMetadata),
    /// The tier cannot run (e.g. no schema loaded).
    Unavailable,
    Failed(DecodeError),
}

/// One way of turning instruction arguments into token metadata.
pub trait MetadataTier: Send + Sync {
    fn name(&self) -> &'static str;

    /// `args` are the instruction bytes after the discriminator.
    fn resolve(&self, args: &[u8], mint: &str) -> TierOutcome;
}

/// Decodes the metadata argument with the instruction schema.
pub struct SchemaTier {
    schema: Option<Arc<dyn InstructionSchema>>,
    instruction: String,
    metadata_arg: String,
}

impl SchemaTier {
    pub fn new(schema: Option<Arc<dyn InstructionSchema>>, layout: &InstructionLayout) -> Self {
        Self {
            schema,
            instruction: layout.schema_instruction.clone(),
            metadata_arg: layout.metadata_arg.clone(),
        }
    }
}

impl MetadataTier for SchemaTier {
    fn name(&self) -> &'static str {
        "schema"
    }

    fn resolve(&self, args: &[u8], _mint: &str) -> TierOutcome {
        let Some(schema) = &self.schema else {
            return TierOutcome::Unavailable;
        };
        let record = match schema.decode_instruction_args(&self.instruction, args) {
            Ok(record) => record,
            Err(e) => return TierOutcome::Failed(e),
        };
        let Some(params) = record.get(&self.metadata_arg).and_then(|v| v.as_struct()) else {
            return TierOutcome::Failed(DecodeError::MissingField(self.metadata_arg.clone()));
        };
        let text = |key: &str| params.get(key).and_then(|v| v.as_str()).map(str::to_string);
        TierOutcome::Resolved(TokenMetadata {
            name: text("name"),
            symbol: text("symbol"),
            uri: text("uri"),
            synthetic: false,
        })
    }
}

/// Synthesizes name and symbol from the mint address.
pub struct PositionalTier {
    name_prefix: String,
    symbol_prefix: String,
}

impl PositionalTier {
    pub fn new(layout: &InstructionLayout) -> Self {
        Self {
            name_prefix: layout.fallback_name_prefix.clone(),
            symbol_prefix: layout.fallback_symbol_prefix.clone(),
        }
    }

    fn metadata(&self, mint: &str) -> TokenMetadata {
        let chars: Vec<char> = mint.chars().collect();
        let head: String = chars.iter().take(8).collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        TokenMetadata {
            name: Some(format!("{}{head}", self.name_prefix)),
            symbol: Some(format!("{}{tail}", self.symbol_prefix)),
            uri: None,
            synthetic: true,
        }
    }
}

impl MetadataTier for PositionalTier {
    fn name(&self) -> &'static str {
        "positional"
    }

    fn resolve(&self, _args: &[u8], mint: &str) -> TierOutcome {
        TierOutcome::Resolved(self.metadata(mint))
    }
}

// ─── Extractor ───────────────────────────────────────────────────────────────

/// Two-phase creation extractor for one program.
pub struct InstructionExtractor {
    source: SourceTag,
    layout: InstructionLayout,
    tiers: Vec<Box<dyn MetadataTier>>,
    positional: PositionalTier,
    invoke_line: String,
    instruction_line: String,
    schema_enabled: bool,
}

impl InstructionExtractor {
    /// Tiers: schema decode first (if a schema is given), then positional.
    pub fn new(
        source: SourceTag,
        layout: InstructionLayout,
        schema: Option<Arc<dyn InstructionSchema>>,
    ) -> Self {
        let schema_enabled = schema.is_some();
        let tiers: Vec<Box<dyn MetadataTier>> = vec![
            Box::new(SchemaTier::new(schema, &layout)),
            Box::new(PositionalTier::new(&layout)),
        ];
        Self {
            source,
            positional: PositionalTier::new(&layout),
            invoke_line: format!("Program {} invoke [1]", layout.program_id),
            instruction_line: format!("Program log: Instruction: {}", layout.log_name),
            layout,
            tiers,
            schema_enabled,
        }
    }

    pub fn decoding_enabled(&self) -> bool {
        self.schema_enabled
    }

    pub fn layout(&self) -> &InstructionLayout {
        &self.layout
    }

    /// Phase 1: a top-level invocation of the program immediately followed
    /// by the target instruction's log line.
    pub fn matches_invocation(&self, logs: &[String]) -> bool {
        logs.windows(2)
            .any(|w| w[0].contains(&self.invoke_line) && w[1].contains(&self.instruction_line))
    }

    /// Phase 2: fetch the transaction and build the event.
    ///
    /// A fetch error degrades to a single refetch that only uses the
    /// positional tier.
    pub async fn extract(&self, client: &dyn ChainClient, signature: &str) -> DecodeOutcome {
        match client.fetch_transaction(signature).await {
            Ok(Some(tx)) => {
                let tiers: Vec<&dyn MetadataTier> = self.tiers.iter().map(|t| &**t).collect();
                self.extract_from(&tx, &tiers)
            }
            Ok(None) => {
                tracing::debug!(source = %self.source, signature, "transaction not found");
                DecodeOutcome::NoMatch
            }
            Err(e) => {
                tracing::warn!(
                    source = %self.source,
                    signature,
                    error = %e,
                    "transaction fetch failed, retrying with positional extraction"
                );
                match client.fetch_transaction(signature).await {
                    Ok(Some(tx)) => {
                        self.extract_from(&tx, &[&self.positional])
                    }
                    Ok(None) => DecodeOutcome::NoMatch,
                    Err(e) => DecodeOutcome::Failed(DecodeError::Chain(e)),
                }
            }
        }
    }

    /// Build the event from an already-fetched transaction.
    pub fn extract_from(&self, tx: &Transaction, tiers: &[&dyn MetadataTier]) -> DecodeOutcome {
        let Some(ix) = self.find_instruction(tx) else {
            tracing::debug!(source = %self.source, signature = %tx.signature, "target instruction not found");
            return DecodeOutcome::NoMatch;
        };

        let Some(accounts) = tx.instruction_accounts(ix) else {
            tracing::debug!(
                source = %self.source,
                signature = %tx.signature,
                "target instruction references unresolved accounts"
            );
            return DecodeOutcome::NoMatch;
        };
        if accounts.len() < self.layout.min_accounts {
            tracing::debug!(
                source = %self.source,
                signature = %tx.signature,
                accounts = accounts.len(),
                "too few accounts on target instruction"
            );
            return DecodeOutcome::NoMatch;
        }
        let Some(mint) = accounts.get(self.layout.mint_index).cloned() else {
            return DecodeOutcome::NoMatch;
        };
        let creator = accounts.get(self.layout.creator_index).cloned();
        let pool = accounts.get(self.layout.pool_index).cloned();

        let args = &ix.data[8..];
        let mut metadata = None;
        for tier in tiers {
            match tier.resolve(args, &mint) {
                TierOutcome::Resolved(m) => {
                    metadata = Some(m);
                    break;
                }
                TierOutcome::Unavailable => {}
                TierOutcome::Failed(e) => {
                    tracing::debug!(
                        source = %self.source,
                        signature = %tx.signature,
                        tier = tier.name(),
                        error = %e,
                        "metadata tier failed"
                    );
                }
            }
        }
        let Some(metadata) = metadata else {
            return DecodeOutcome::Failed(DecodeError::MissingField("metadata".into()));
        };

        let fields = CreationFields {
            mint,
            name: metadata.name,
            symbol: metadata.symbol,
            description: Some(self.layout.description.clone()),
            image_uri: metadata.uri,
            creator,
            pool_or_curve_key: pool,
            synthetic_metadata: metadata.synthetic,
        };
        DecodeOutcome::Matched(CreationEvent::from_fields(
            self.source,
            fields,
            Some(tx.signature.clone()),
        ))
    }

    fn find_instruction<'a>(&self, tx: &'a Transaction) -> Option<&'a CompiledInstruction> {
        tx.instructions.iter().find(|ix| {
            tx.program_id(ix) == Some(self.layout.program_id.as_str())
                && ix.data.len() >= 8
                && ix.data[..8] == self.layout.discriminator
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chainwatch_core::{ChainError, Commitment, LogStream, SubscriptionHandle};

    use crate::coder::{BorshCoder, DecodedRecord};
    use crate::idl::LAUNCHLAB_IDL;

    const MINT: &str = "LaunchMint111111111111111111111111111111111";

    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<Option<Transaction>, ChainError>>>,
        fetches: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<Option<Transaction>, ChainError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedClient {
        async fn open_log_subscription(
            &self,
            _program: &str,
            _commitment: Commitment,
        ) -> Result<(SubscriptionHandle, LogStream), ChainError> {
            Err(ChainError::Closed)
        }

        async fn close_log_subscription(&self, _handle: SubscriptionHandle) -> Result<(), ChainError> {
            Ok(())
        }

        async fn fetch_transaction(&self, _signature: &str) -> Result<Option<Transaction>, ChainError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }

        fn endpoint(&self) -> &str {
            "scripted"
        }
    }

    struct FailingSchema;

    impl InstructionSchema for FailingSchema {
        fn decode_instruction_args(&self, _: &str, _: &[u8]) -> Result<DecodedRecord, DecodeError> {
            Err(DecodeError::Borsh {
                field: "baseMintParam".into(),
                reason: "corrupt".into(),
            })
        }
    }

    fn borsh_string(s: &str) -> Vec<u8> {
        let mut out = (s.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn initialize_data() -> Vec<u8> {
        let mut data = instruction_discriminator("initialize").to_vec();
        data.push(6);
        data.extend(borsh_string("Lab Coin"));
        data.extend(borsh_string("LABC"));
        data.extend(borsh_string("https://lab.example/meta.json"));
        data
    }

    /// Keys: payer, mint, ..., program last. Instruction lists `n_accounts`.
    fn launch_tx(n_accounts: usize, data: Vec<u8>) -> Transaction {
        let mut keys: Vec<String> = (0..9).map(|i| format!("Acct{i}")).collect();
        keys[1] = MINT.into();
        keys[4] = "PoolState1".into();
        keys[6] = "Creator1".into();
        keys.push(LAUNCHLAB_PROGRAM_ID.into());
        Transaction {
            signature: "sig-launch".into(),
            account_keys: keys,
            instructions: vec![
                CompiledInstruction {
                    program_id_index: 0,
                    accounts: vec![],
                    data: vec![2, 0, 0, 0],
                },
                CompiledInstruction {
                    program_id_index: 9,
                    accounts: (0..n_accounts).collect(),
                    data,
                },
            ],
            ..Default::default()
        }
    }

    fn extractor(schema: Option<Arc<dyn InstructionSchema>>) -> InstructionExtractor {
        InstructionExtractor::new(SourceTag::RaydiumLaunchlab, InstructionLayout::default(), schema)
    }

    fn coder() -> Option<Arc<dyn InstructionSchema>> {
        Some(Arc::new(BorshCoder::from_json(LAUNCHLAB_IDL).unwrap()))
    }

    #[test]
    fn invocation_pattern() {
        let ex = extractor(None);
        let invoke = format!("Program {LAUNCHLAB_PROGRAM_ID} invoke [1]");
        let hit = vec![
            "Program ComputeBudget111111111111111111111111111111 invoke [1]".to_string(),
            invoke.clone(),
            "Program log: Instruction: Initialize".to_string(),
        ];
        assert!(ex.matches_invocation(&hit));

        let gap = vec![invoke.clone(), "Program log: other".into(), "Program log: Instruction: Initialize".into()];
        assert!(!ex.matches_invocation(&gap));

        let nested = vec![
            format!("Program {LAUNCHLAB_PROGRAM_ID} invoke [2]"),
            "Program log: Instruction: Initialize".into(),
        ];
        assert!(!ex.matches_invocation(&nested));

        let buy = vec![invoke, "Program log: Instruction: BuyExactIn".into()];
        assert!(!ex.matches_invocation(&buy));
    }

    #[tokio::test]
    async fn schema_tier_resolves_metadata() {
        let client = ScriptedClient::new(vec![Ok(Some(launch_tx(8, initialize_data())))]);
        let event = extractor(coder())
            .extract(&client, "sig-launch")
            .await
            .into_event()
            .unwrap();

        assert_eq!(event.mint, MINT);
        assert_eq!(event.name, "Lab Coin");
        assert_eq!(event.symbol, "LABC");
        assert_eq!(event.image_uri.as_deref(), Some("https://lab.example/meta.json"));
        assert_eq!(event.creator, "Creator1");
        assert_eq!(event.pool_or_curve_key.as_deref(), Some("PoolState1"));
        assert_eq!(event.description.as_deref(), Some("New token launched on Raydium Launchlab"));
        assert_eq!(event.source_tag, SourceTag::RaydiumLaunchlab);
        assert!(!event.synthetic_metadata);
    }

    #[tokio::test]
    async fn failing_schema_falls_back_to_positional() {
        let client = ScriptedClient::new(vec![Ok(Some(launch_tx(8, initialize_data())))]);
        let event = extractor(Some(Arc::new(FailingSchema)))
            .extract(&client, "sig-launch")
            .await
            .into_event()
            .unwrap();

        assert!(event.name.starts_with("Launchlab Token "));
        assert_eq!(event.name, format!("Launchlab Token {}", &MINT[..8]));
        assert_eq!(event.symbol, format!("LL{}", &MINT[MINT.len() - 4..]));
        assert!(event.image_uri.is_none());
        assert!(event.synthetic_metadata);
    }

    #[tokio::test]
    async fn missing_schema_uses_positional() {
        let client = ScriptedClient::new(vec![Ok(Some(launch_tx(8, initialize_data())))]);
        let ex = extractor(None);
        assert!(!ex.decoding_enabled());
        let event = ex.extract(&client, "sig").await.into_event().unwrap();
        assert_eq!(event.symbol, "LL1111");
        assert!(event.synthetic_metadata);
    }

    #[tokio::test]
    async fn too_few_accounts_is_skipped() {
        let client = ScriptedClient::new(vec![Ok(Some(launch_tx(7, initialize_data())))]);
        let outcome = extractor(coder()).extract(&client, "sig").await;
        assert!(matches!(outcome, DecodeOutcome::NoMatch));
    }

    #[tokio::test]
    async fn unresolved_account_index_is_skipped() {
        // Index 42 has no key, e.g. an unloaded lookup-table address.
        let mut tx = launch_tx(8, initialize_data());
        tx.instructions[1].accounts = vec![0, 1, 42, 2, 3, 4, 5, 6, 7];
        let client = ScriptedClient::new(vec![Ok(Some(tx))]);
        let outcome = extractor(coder()).extract(&client, "sig").await;
        assert!(matches!(outcome, DecodeOutcome::NoMatch));
    }

    #[tokio::test]
    async fn wrong_discriminator_or_missing_tx_is_skipped() {
        let mut data = initialize_data();
        data[0] ^= 0xff;
        let client = ScriptedClient::new(vec![Ok(Some(launch_tx(8, data))), Ok(None)]);
        let ex = extractor(coder());
        assert!(matches!(ex.extract(&client, "a").await, DecodeOutcome::NoMatch));
        assert!(matches!(ex.extract(&client, "b").await, DecodeOutcome::NoMatch));
        assert_eq!(client.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_error_refetches_once_for_positional() {
        let client = ScriptedClient::new(vec![
            Err(ChainError::Transport("reset".into())),
            Ok(Some(launch_tx(8, initialize_data()))),
        ]);
        let event = extractor(coder())
            .extract(&client, "sig")
            .await
            .into_event()
            .unwrap();
        assert_eq!(client.fetches.load(Ordering::SeqCst), 2);
        assert!(event.synthetic_metadata);
        assert!(event.name.starts_with("Launchlab Token "));
    }

    #[tokio::test]
    async fn second_fetch_error_fails() {
        let client = ScriptedClient::new(vec![
            Err(ChainError::Transport("reset".into())),
            Err(ChainError::Transport("reset again".into())),
        ]);
        let outcome = extractor(coder()).extract(&client, "sig").await;
        assert!(matches!(outcome, DecodeOutcome::Failed(DecodeError::Chain(_))));
        assert_eq!(client.fetches.load(Ordering::SeqCst), 2);
    }
}
