use std::sync::{
    mpsc::{channel, Receiver},
    Arc,
};

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_primitives::{
    aliases::{U24, U48},
    Address, Bytes, FixedBytes, PrimitiveSignature, TxKind, B256, U256,
};
use pretty_assertions::assert_eq;
use taiko_driver_lib::{
    consts::{ANCHOR_V2_GAS_LIMIT, ANCHOR_V3_V4_GAS_LIMIT, TAIKO_DEVNET_SPEC},
    input::{
        pacaya::BlockParams,
        shasta::{BlobSlice, Derivation, DerivationSource, Proposal},
        BatchInfo, BatchMetadata, BlockMetadataV2, L1Inclusion, OntakeProposal, PacayaBatch,
        ProposalMetadata, ProposedEventPayload, ShastaProposal,
    },
    manifest::{encode_manifest_payload, BlockManifest, DerivationSourceManifest},
    utils::{payload::pacaya_difficulty, shasta::SHASTA_INITIAL_BASE_FEE, zlib_compress_data},
};

use crate::{
    inserter::InserterContext,
    interfaces::DriverError,
    observer::LastSeenProposal,
    preconf::PreconfEnvelope,
    provider::{
        mem::{EngineCalls, MemEngine, MemL1Source, StaticProtocolReader},
        ExecutableData, ExecutionEngine, L1Origin,
    },
    Driver,
};

type MemDriver = Driver<MemEngine, MemL1Source, StaticProtocolReader>;

const COINBASE: Address = Address::repeat_byte(0xc0);
const PROPOSER: Address = Address::repeat_byte(0xbe);
const BLOB_HASH: B256 = B256::repeat_byte(0xb1);

fn transfer(nonce: u64) -> TxEnvelope {
    let tx = TxEip1559 {
        chain_id: TAIKO_DEVNET_SPEC.chain_id,
        nonce,
        gas_limit: 21_000,
        max_fee_per_gas: 1_000_000_000,
        to: TxKind::Call(Address::repeat_byte(0x42)),
        value: U256::from(1u64),
        ..Default::default()
    };
    let signature = PrimitiveSignature::new(U256::from(1u64), U256::from(2u64), false);
    tx.into_signed(signature).into()
}

fn compressed_tx_list(count: u64) -> Bytes {
    let txs = (0..count).map(transfer).collect::<Vec<_>>();
    Bytes::from(zlib_compress_data(&alloy_rlp::encode(&txs)).unwrap())
}

fn driver(
    l1: MemL1Source,
    protocol: StaticProtocolReader,
) -> (MemDriver, Receiver<LastSeenProposal>) {
    let (tx, rx) = channel();
    let ctx = InserterContext::new(
        MemEngine::with_genesis(30_000_000, 0),
        l1,
        protocol,
        TAIKO_DEVNET_SPEC.clone(),
    )
    .unwrap()
    .with_observer(Arc::new(tx));
    (Driver::new(ctx), rx)
}

fn inclusion(l1: &MemL1Source, number: u64) -> L1Inclusion {
    L1Inclusion {
        block_height: number,
        block_hash: l1.header(number).unwrap().hash,
    }
}

fn pacaya_protocol() -> StaticProtocolReader {
    StaticProtocolReader {
        base_fee: 10_000_000,
        batch_last_block_ids: [(0, 0)].into(),
        ..Default::default()
    }
}

fn pacaya_batch(l1: &MemL1Source) -> ProposalMetadata {
    let block = |num_transactions, time_shift| BlockParams {
        numTransactions: num_transactions,
        timeShift: time_shift,
        signalSlots: vec![],
    };
    ProposalMetadata::Pacaya(PacayaBatch {
        info: BatchInfo {
            blocks: vec![block(2, 0), block(1, 4), block(0, 6)],
            coinbase: COINBASE,
            gasLimit: 15_000_000,
            lastBlockId: 3,
            lastBlockTimestamp: 100,
            anchorBlockId: 5,
            anchorBlockHash: l1.header(5).unwrap().hash,
            extraData: B256::with_last_byte(50),
            ..Default::default()
        },
        meta: BatchMetadata {
            batchId: 1,
            proposer: PROPOSER,
            ..Default::default()
        },
        calldata_tx_list: compressed_tx_list(3),
        l1: inclusion(l1, 10),
    })
}

#[tokio::test]
async fn pacaya_batch_builds_a_chain() {
    let l1 = MemL1Source::with_chain(16);
    let batch = pacaya_batch(&l1);
    let (driver, observed) = driver(l1, pacaya_protocol());

    assert_eq!(driver.insert_blocks(&batch).await.unwrap(), 3);

    let engine = &driver.context().engine;
    let mut parent = engine.header_by_number(0).await.unwrap().unwrap();
    for (number, timestamp) in [(1, 90), (2, 94), (3, 100)] {
        let header = engine.header_by_number(number).await.unwrap().unwrap();
        assert_eq!(header.inner.parent_hash, parent.hash);
        assert_eq!(header.inner.timestamp, timestamp);
        assert_eq!(header.inner.beneficiary, COINBASE);
        assert_eq!(header.inner.gas_limit, 15_000_000 + ANCHOR_V3_V4_GAS_LIMIT);
        assert_eq!(header.inner.mix_hash, pacaya_difficulty(number));
        assert_eq!(header.inner.extra_data.len(), 32);
        parent = header;
    }

    let origin = engine.l1_origin(3).unwrap();
    assert_eq!(origin.l1_block_height, Some(10));
    assert_eq!(origin.l2_block_hash, parent.hash);
    assert_eq!(engine.head_l1_origin_id(), Some(3));
    assert_eq!(engine.last_block_id_by_batch_id(1).await.unwrap(), Some(3));
    assert_eq!(
        observed.try_recv().unwrap(),
        LastSeenProposal {
            proposal_id: 1,
            last_block_id: 3,
            preconf_chain_reorged: true,
        }
    );
}

#[tokio::test]
async fn redelivered_batch_only_refreshes_l1_origins() {
    let l1 = MemL1Source::with_chain(16);
    let batch = pacaya_batch(&l1);
    let ProposalMetadata::Pacaya(mut moved) = batch.clone() else {
        unreachable!()
    };
    moved.l1 = inclusion(&l1, 12);
    let (driver, observed) = driver(l1, pacaya_protocol());

    driver.insert_blocks(&batch).await.unwrap();
    let engine = &driver.context().engine;
    let head = engine.head_header().await.unwrap();
    let payload_id = engine.l1_origin(2).unwrap().build_payload_args_id;
    engine.reset_calls();

    assert_eq!(
        driver
            .insert_blocks(&ProposalMetadata::Pacaya(moved))
            .await
            .unwrap(),
        3
    );
    assert_eq!(
        engine.calls(),
        EngineCalls {
            update_l1_origin: 3,
            set_head_l1_origin: 1,
            set_batch_to_last_block: 1,
            ..Default::default()
        }
    );
    assert_eq!(engine.head_header().await.unwrap(), head);
    let origin = engine.l1_origin(2).unwrap();
    assert_eq!(origin.l1_block_height, Some(12));
    assert_eq!(origin.build_payload_args_id, payload_id);

    let events = observed.try_iter().collect::<Vec<_>>();
    assert_eq!(events.len(), 2);
    assert!(!events[1].preconf_chain_reorged);
}

#[tokio::test]
async fn redelivered_batch_with_other_txs_is_rebuilt() {
    let l1 = MemL1Source::with_chain(16);
    let batch = pacaya_batch(&l1);
    let ProposalMetadata::Pacaya(mut changed) = batch.clone() else {
        unreachable!()
    };
    changed.calldata_tx_list = compressed_tx_list(1);
    let (driver, _observed) = driver(l1, pacaya_protocol());

    driver.insert_blocks(&batch).await.unwrap();
    let engine = &driver.context().engine;
    let first = engine.header_by_number(1).await.unwrap().unwrap();
    let first_txs = engine.transaction_hashes_by_number(1).await.unwrap().unwrap();
    assert_eq!(first_txs.len(), 3);
    // Origins written by a client that did not record payload ids.
    for block_id in 1..=3 {
        engine.insert_l1_origin(L1Origin {
            build_payload_args_id: FixedBytes::ZERO,
            ..engine.l1_origin(block_id).unwrap()
        });
    }
    engine.reset_calls();

    driver
        .insert_blocks(&ProposalMetadata::Pacaya(changed))
        .await
        .unwrap();
    assert_eq!(engine.calls().new_payload, 3);
    let rebuilt = engine.header_by_number(1).await.unwrap().unwrap();
    assert_ne!(rebuilt.hash, first.hash);
    let rebuilt_txs = engine.transaction_hashes_by_number(1).await.unwrap().unwrap();
    assert_eq!(rebuilt_txs.len(), 2);
    assert_eq!(rebuilt_txs[0], first_txs[0]);
    assert_ne!(engine.l1_origin(1).unwrap().build_payload_args_id, FixedBytes::ZERO);
}

#[tokio::test]
async fn block_without_transactions_is_not_known() {
    let l1 = MemL1Source::with_chain(16);
    let batch = pacaya_batch(&l1);
    let (driver, _observed) = driver(l1, pacaya_protocol());

    driver.insert_blocks(&batch).await.unwrap();
    let engine = &driver.context().engine;
    engine.set_transaction_hashes(2, Vec::new());
    engine.reset_calls();

    driver.insert_blocks(&batch).await.unwrap();
    assert_eq!(engine.calls().new_payload, 3);
    assert_eq!(engine.calls().update_l1_origin, 0);
}

#[tokio::test]
async fn pacaya_invalid_blob_yields_empty_blocks() {
    let l1 = MemL1Source::with_chain(16);
    l1.insert_blob_data(
        BLOB_HASH,
        Err(DriverError::InvalidBlob("bad field element".into())),
    );
    let ProposalMetadata::Pacaya(mut batch) = pacaya_batch(&l1) else {
        unreachable!()
    };
    batch.info.blobHashes = vec![BLOB_HASH];
    batch.info.blobCreatedIn = 9;
    batch.calldata_tx_list = Bytes::new();
    let (driver, _observed) = driver(l1, pacaya_protocol());

    assert_eq!(
        driver
            .insert_blocks(&ProposalMetadata::Pacaya(batch))
            .await
            .unwrap(),
        3
    );
}

fn shasta_proposal(l1: &MemL1Source, source: DerivationSource) -> ProposalMetadata {
    ProposalMetadata::Shasta(ShastaProposal {
        payload: ProposedEventPayload {
            proposal: Proposal {
                id: U48::from(1u64),
                timestamp: U48::from(1_000u64),
                proposer: PROPOSER,
                ..Default::default()
            },
            derivation: Derivation {
                originBlockNumber: U48::from(20u64),
                originBlockHash: l1.header(20).unwrap().hash,
                basefeeSharingPctg: 75,
                sources: vec![source],
            },
            ..Default::default()
        },
        is_low_bond: false,
        l1: inclusion(l1, 21),
    })
}

fn blob_source() -> DerivationSource {
    DerivationSource {
        isForcedInclusion: false,
        blobSlice: BlobSlice {
            blobHashes: vec![BLOB_HASH],
            offset: U24::ZERO,
            timestamp: U48::from(1_000u64),
        },
    }
}

#[tokio::test]
async fn shasta_manifest_blocks_are_inserted() {
    let l1 = MemL1Source::with_chain(32);
    let block = |timestamp, anchor_block_number, transactions| BlockManifest {
        timestamp,
        coinbase: COINBASE,
        anchor_block_number,
        gas_limit: 30_000_000,
        transactions,
    };
    let manifest = DerivationSourceManifest {
        blocks: vec![block(990, 10, vec![transfer(0)]), block(995, 12, vec![])],
    };
    l1.insert_blob_data(BLOB_HASH, Ok(encode_manifest_payload(&manifest).unwrap()));
    let proposal = shasta_proposal(&l1, blob_source());
    let (driver, observed) = driver(l1, StaticProtocolReader::default());

    assert_eq!(driver.insert_blocks(&proposal).await.unwrap(), 2);

    let engine = &driver.context().engine;
    let first = engine.header_by_number(1).await.unwrap().unwrap();
    let second = engine.header_by_number(2).await.unwrap().unwrap();
    assert_eq!(first.inner.timestamp, 990);
    assert_eq!(first.base_fee(), SHASTA_INITIAL_BASE_FEE);
    assert_eq!(first.inner.gas_limit, 30_000_000 + ANCHOR_V3_V4_GAS_LIMIT);
    assert_eq!(first.inner.extra_data, Bytes::from_static(&[75, 0]));
    assert_eq!(second.inner.parent_hash, first.hash);
    assert_eq!(second.inner.timestamp, 995);
    assert_eq!(engine.last_block_id_by_batch_id(1).await.unwrap(), Some(2));
    assert_eq!(observed.try_recv().unwrap().last_block_id, 2);
}

#[tokio::test]
async fn shasta_invalid_blob_builds_default_block() {
    let l1 = MemL1Source::with_chain(32);
    l1.insert_blob_data(BLOB_HASH, Err(DriverError::InvalidBlob("bad version".into())));
    let proposal = shasta_proposal(&l1, blob_source());
    let (driver, _observed) = driver(l1, StaticProtocolReader::default());

    assert_eq!(driver.insert_blocks(&proposal).await.unwrap(), 1);

    let header = driver
        .context()
        .engine
        .header_by_number(1)
        .await
        .unwrap()
        .unwrap();
    // Lower timestamp bound: the proposal timestamp minus the maximum offset.
    assert_eq!(header.inner.timestamp, 1_000 - 384);
    assert_eq!(header.inner.beneficiary, PROPOSER);
    assert_eq!(header.inner.gas_limit, 30_000_000 + ANCHOR_V3_V4_GAS_LIMIT);
}

#[tokio::test]
async fn shasta_unavailable_blob_is_retried_later() {
    let l1 = MemL1Source::with_chain(32);
    let proposal = shasta_proposal(&l1, blob_source());
    let (driver, observed) = driver(l1, StaticProtocolReader::default());

    let err = driver.insert_blocks(&proposal).await.unwrap_err();
    assert!(matches!(err.root(), DriverError::BlobUnavailable(_)));
    assert_eq!(driver.context().engine.head_number(), 0);
    assert!(observed.try_recv().is_err());
}

#[tokio::test]
async fn shasta_genesis_proposal_is_skipped() {
    let l1 = MemL1Source::with_chain(32);
    let ProposalMetadata::Shasta(mut proposal) = shasta_proposal(&l1, blob_source()) else {
        unreachable!()
    };
    proposal.payload.proposal.id = U48::ZERO;
    let (driver, _observed) = driver(l1, StaticProtocolReader::default());

    assert_eq!(
        driver
            .insert_blocks(&ProposalMetadata::Shasta(proposal))
            .await
            .unwrap(),
        0
    );
    assert_eq!(driver.context().engine.calls(), EngineCalls::default());
}

#[tokio::test]
async fn ontake_block_is_inserted() {
    let l1 = MemL1Source::with_chain(16);
    let proposal = ProposalMetadata::Ontake(OntakeProposal {
        meta: BlockMetadataV2 {
            id: 1,
            anchorBlockHash: l1.header(5).unwrap().hash,
            anchorBlockId: 5,
            difficulty: B256::repeat_byte(7),
            coinbase: COINBASE,
            gasLimit: 15_000_000,
            timestamp: 24,
            ..Default::default()
        },
        calldata_tx_list: compressed_tx_list(2),
        l1: inclusion(&l1, 6),
    });
    let (driver, observed) = driver(l1, pacaya_protocol());

    assert_eq!(driver.insert_blocks(&proposal).await.unwrap(), 1);

    let header = driver
        .context()
        .engine
        .header_by_number(1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(header.inner.gas_limit, 15_000_000 + ANCHOR_V2_GAS_LIMIT);
    assert_eq!(header.inner.mix_hash, B256::repeat_byte(7));
    assert_eq!(header.inner.timestamp, 24);
    assert_eq!(
        observed.try_recv().unwrap(),
        LastSeenProposal {
            proposal_id: 1,
            last_block_id: 1,
            preconf_chain_reorged: true,
        }
    );
}

#[tokio::test]
async fn no_envelopes_insert_nothing() {
    let (driver, _observed) = driver(MemL1Source::default(), StaticProtocolReader::default());
    let headers = driver
        .insert_preconf_blocks_from_envelopes(&[] as &[PreconfEnvelope], false)
        .await
        .unwrap();
    assert!(headers.is_empty());
}

#[tokio::test]
async fn preconf_envelopes_go_to_the_active_fork() {
    let (driver, _observed) = driver(MemL1Source::default(), StaticProtocolReader::default());
    let engine = &driver.context().engine;
    let genesis = engine.head_header().await.unwrap();
    let tx_list = alloy_rlp::encode(vec![transfer(0)]);
    let envelope = PreconfEnvelope {
        payload: ExecutableData {
            parent_hash: genesis.hash,
            fee_recipient: COINBASE,
            block_number: 1,
            gas_limit: 31_000_000,
            timestamp: 12,
            base_fee_per_gas: U256::from(SHASTA_INITIAL_BASE_FEE),
            transactions: vec![zlib_compress_data(&tx_list).unwrap().into()],
            ..Default::default()
        },
        ..Default::default()
    };

    let headers = driver
        .insert_preconf_blocks_from_envelopes(&[envelope], false)
        .await
        .unwrap();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].inner.beneficiary, COINBASE);
    assert!(engine.l1_origin(1).unwrap().is_preconf_block());
    assert_eq!(engine.head_l1_origin_id(), None);
}
