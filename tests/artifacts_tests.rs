//! Unit tests for Foundry artifact loading

use intent_settler::abi::event_topic;
use intent_settler::ContractArtifact;
use std::fs;
use std::path::PathBuf;

const SETTLER_ARTIFACT: &str = r#"{
  "abi": [
    {
      "type": "function",
      "name": "fill",
      "inputs": [
        { "name": "orderId", "type": "bytes32", "internalType": "bytes32" },
        { "name": "originData", "type": "bytes", "internalType": "bytes" }
      ],
      "outputs": [],
      "stateMutability": "nonpayable"
    },
    {
      "type": "event",
      "name": "OrderExecuted",
      "inputs": [
        { "name": "orderId", "type": "bytes32", "indexed": true, "internalType": "bytes32" },
        {
          "name": "calls",
          "type": "tuple[]",
          "indexed": false,
          "internalType": "struct Call[]",
          "components": [
            { "name": "target", "type": "address", "internalType": "address" },
            { "name": "callData", "type": "bytes", "internalType": "bytes" },
            { "name": "value", "type": "uint256", "internalType": "uint256" }
          ]
        }
      ],
      "anonymous": false
    }
  ],
  "bytecode": { "object": "0x6080604052", "sourceMap": "", "linkReferences": {} }
}"#;

/// What is tested: ABI entries and bytecode are parsed from Foundry JSON
/// Why: Deployments submit exactly this bytecode
#[test]
fn test_from_json() {
    let artifact = ContractArtifact::from_json("SimpleDestinationSettler", SETTLER_ARTIFACT).unwrap();
    assert_eq!(artifact.name, "SimpleDestinationSettler");
    assert_eq!(artifact.bytecode, vec![0x60, 0x80, 0x60, 0x40, 0x52]);
    assert_eq!(artifact.abi.len(), 2);
    assert!(artifact.event("fill").is_none(), "functions are not events");
}

/// What is tested: event signatures expand tuple components
/// Why: topics[0] hashes the canonical signature, not the struct name
#[test]
fn test_event_signature_and_topic() {
    let artifact = ContractArtifact::from_json("SimpleDestinationSettler", SETTLER_ARTIFACT).unwrap();
    let entry = artifact.event("OrderExecuted").unwrap();
    let signature = entry.signature();
    assert_eq!(signature, "OrderExecuted(bytes32,(address,bytes,uint256)[])");
    assert!(entry.inputs[0].indexed);

    let topic = artifact.event_topic("OrderExecuted").unwrap();
    assert_eq!(topic.0, event_topic(&signature));
}

/// What is tested: asking for an undeclared event fails with the contract named
/// Why: A stale build must not yield a topic that never matches
#[test]
fn test_missing_event() {
    let artifact = ContractArtifact::from_json("SimpleDestinationSettler", SETTLER_ARTIFACT).unwrap();
    let err = artifact.event_topic("check").unwrap_err();
    assert!(err.to_string().contains("SimpleDestinationSettler"));
}

/// What is tested: optional event lookups return None instead of failing
/// Why: Contracts without an `Open` event are still usable, without open detection
#[test]
fn test_declared_event_topic() {
    let artifact = ContractArtifact::from_json("SimpleDestinationSettler", SETTLER_ARTIFACT).unwrap();
    let topic = artifact.declared_event_topic("OrderExecuted").unwrap();
    assert_eq!(topic, artifact.event_topic("OrderExecuted").unwrap());
    assert_eq!(artifact.declared_event_topic("Open"), None);
}

/// What is tested: non-hex bytecode is rejected
/// Why: Unlinked library placeholders cannot be deployed
#[test]
fn test_unlinked_bytecode() {
    let unlinked = SETTLER_ARTIFACT.replace("0x6080604052", "0x6080__$abc$__");
    assert!(ContractArtifact::from_json("SimpleDestinationSettler", &unlinked).is_err());
}

/// What is tested: artifacts are found under `<Source>.sol/<Contract>.json`
/// Why: XAccount is compiled from DestinationSettler.sol
#[test]
fn test_load_from_output_dir() {
    let dir = PathBuf::from(".tmp/test_artifacts");
    fs::create_dir_all(dir.join("DestinationSettler.sol")).unwrap();
    fs::write(dir.join("DestinationSettler.sol/XAccount.json"), SETTLER_ARTIFACT).unwrap();

    let xaccount = ContractArtifact::load_from_source(&dir, "DestinationSettler", "XAccount").unwrap();
    assert_eq!(xaccount.name, "XAccount");

    let err = ContractArtifact::load(&dir, "XAccount").unwrap_err();
    assert!(format!("{:#}", err).contains("forge build"));

    fs::remove_dir_all(&dir).unwrap();
}
