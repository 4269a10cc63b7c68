use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use warp::http::StatusCode;

use quarry_api::{routes, ApiState};
use quarry_chain::{Chain, ConsensusParams};
use quarry_crypto::{sign_tx, Keypair, Signer};
use quarry_p2p::Broadcaster;
use quarry_types::{Address, Block, Transaction, ADDRESS_LEN};

#[derive(Default)]
struct Recorder {
    txs: Mutex<Vec<Transaction>>,
    blocks: Mutex<Vec<Block>>,
}

impl Broadcaster for Recorder {
    fn broadcast_tx(&self, tx: &Transaction) {
        self.txs.lock().push(tx.clone());
    }

    fn broadcast_block(&self, block: &Block) {
        self.blocks.lock().push(block.clone());
    }
}

fn setup() -> (ApiState, Arc<Recorder>) {
    let chain = Arc::new(Chain::new(ConsensusParams::new(1, 50)));
    let recorder = Arc::new(Recorder::default());
    let state = ApiState::new(chain).with_broadcaster(recorder.clone());
    (state, recorder)
}

fn addr(b: u8) -> Address {
    Address::from_bytes([b; ADDRESS_LEN])
}

fn body(res: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
    serde_json::from_slice(res.body()).unwrap()
}

#[tokio::test]
async fn mine_then_query_balance_and_nonce() {
    let (state, recorder) = setup();
    let api = routes(state.clone());
    let miner = addr(7);

    let res = warp::test::request()
        .method("POST")
        .path("/mine")
        .json(&serde_json::json!({ "miner": miner.to_hex() }))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let block: Block = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(block.index, 1);
    assert_eq!(recorder.blocks.lock().len(), 1);

    let res = warp::test::request()
        .path(&format!("/balance?addr={}", miner.to_hex()))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(&res)["balance"], 50);
    assert_eq!(body(&res)["address"], miner.to_hex());

    let res = warp::test::request()
        .path(&format!("/nonce?addr={}", miner.to_hex()))
        .reply(&api)
        .await;
    assert_eq!(body(&res)["nonce"], 1);

    let res = warp::test::request().path("/chain").reply(&api).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(&res).as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn submitted_transaction_is_admitted_and_broadcast() {
    let (state, recorder) = setup();
    let alice = Keypair::from_secret_bytes(&[1u8; 32]);
    state.chain.mine_block(alice.address()).unwrap();
    let api = routes(state.clone());

    let mut tx = Transaction::transfer(alice.address(), addr(2), 10, 1, 1, 0);
    sign_tx(&alice, &mut tx);

    let res = warp::test::request()
        .method("POST")
        .path("/transaction")
        .json(&tx)
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(&res)["ok"], true);
    assert_eq!(state.chain.pending_transactions(), vec![tx.clone()]);
    assert_eq!(*recorder.txs.lock(), vec![tx.clone()]);

    // same nonce again
    let res = warp::test::request()
        .method("POST")
        .path("/transaction")
        .json(&tx)
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(body(&res)["error"]
        .as_str()
        .is_some_and(|e| e.contains("nonce")));
    assert_eq!(recorder.txs.lock().len(), 1);
}

#[tokio::test]
async fn bad_inputs_are_json_errors() {
    let (state, recorder) = setup();
    let api = routes(state);

    let res = warp::test::request()
        .method("POST")
        .path("/transaction")
        .body("{not json")
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(body(&res)["error"].is_string());

    let res = warp::test::request()
        .method("POST")
        .path("/mine")
        .json(&serde_json::json!({ "miner": "" }))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(recorder.blocks.lock().is_empty());

    let res = warp::test::request().path("/balance").reply(&api).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res)["error"], "missing addr");

    let res = warp::test::request()
        .path("/balance?addr=xyz")
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = warp::test::request().path("/nowhere").reply(&api).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn works_without_a_broadcaster() {
    let chain = Arc::new(Chain::new(ConsensusParams::new(1, 50)));
    let api = routes(ApiState::new(chain.clone()));

    let res = warp::test::request()
        .method("POST")
        .path("/mine")
        .json(&serde_json::json!({ "miner": addr(3).to_hex() }))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(chain.height(), 1);
}

#[tokio::test]
async fn reads_are_served_while_blocks_are_appended() {
    let (state, _) = setup();
    let api = routes(state.clone());
    let miner = addr(5);

    let chain = state.chain.clone();
    let writer = std::thread::spawn(move || {
        for _ in 0..20 {
            chain.mine_block(miner).unwrap();
        }
    });

    let mut seen = 0;
    for _ in 0..20 {
        let res = warp::test::request().path("/chain").reply(&api).await;
        assert_eq!(res.status(), StatusCode::OK);
        let len = body(&res).as_array().map(Vec::len).unwrap();
        assert!(len >= seen);
        seen = len;

        let res = warp::test::request()
            .path(&format!("/balance?addr={}", miner.to_hex()))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
    }
    writer.join().unwrap();

    let res = warp::test::request()
        .path(&format!("/balance?addr={}", miner.to_hex()))
        .reply(&api)
        .await;
    assert_eq!(body(&res)["balance"], 20 * 50);
}
