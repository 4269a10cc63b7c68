use quarry_types::{
    Address, Block, Hash32, PublicKeyBytes, SignatureBytes, Transaction, TxId, ADDRESS_LEN,
};

const TAG_COINBASE: u8 = 0;
const TAG_TRANSFER: u8 = 1;

const ABSENT: u8 = 0;
const PRESENT: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("trailing bytes after value")]
    TrailingBytes,
    #[error("unknown transaction tag {0}")]
    InvalidTag(u8),
    #[error("invalid presence flag {0}")]
    InvalidFlag(u8),
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], CodecError> {
    if input.len() < n {
        return Err(CodecError::UnexpectedEof);
    }
    let (a, b) = input.split_at(n);
    *input = b;
    Ok(a)
}

fn read_u8(input: &mut &[u8]) -> Result<u8, CodecError> {
    Ok(take(input, 1)?[0])
}

fn read_u64_le(input: &mut &[u8]) -> Result<u64, CodecError> {
    let b = take(input, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(b);
    Ok(u64::from_le_bytes(buf))
}

fn read_array<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], CodecError> {
    let b = take(input, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(b);
    Ok(out)
}

fn read_optional<const N: usize>(input: &mut &[u8]) -> Result<Option<[u8; N]>, CodecError> {
    match read_u8(input)? {
        ABSENT => Ok(None),
        PRESENT => read_array(input).map(Some),
        other => Err(CodecError::InvalidFlag(other)),
    }
}

fn read_address(input: &mut &[u8]) -> Result<Address, CodecError> {
    read_array::<ADDRESS_LEN>(input).map(Address::from_bytes)
}

fn write_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

fn write_u64_le(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_optional(out: &mut Vec<u8>, v: Option<&[u8]>) {
    match v {
        Some(bytes) => {
            write_u8(out, PRESENT);
            out.extend_from_slice(bytes);
        }
        None => write_u8(out, ABSENT),
    }
}

/// Canonical encoding of a transaction without its signature.
/// Field order is CONSENSUS-RELEVANT. Changing it is a hard fork.
pub fn encode_tx_unsigned(tx: &Transaction) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    match &tx.from {
        Some(from) => {
            write_u8(&mut out, TAG_TRANSFER);
            out.extend_from_slice(from.as_bytes());
        }
        None => write_u8(&mut out, TAG_COINBASE),
    }
    out.extend_from_slice(tx.to.as_bytes());
    write_u64_le(&mut out, tx.amount);
    write_u64_le(&mut out, tx.fee);
    write_u64_le(&mut out, tx.nonce);
    write_u64_le(&mut out, tx.timestamp);
    write_optional(&mut out, tx.public_key.as_ref().map(|k| k.as_slice()));
    out
}

/// Canonical encoding of a transaction including its signature.
pub fn encode_tx_signed(tx: &Transaction) -> Vec<u8> {
    let mut out = encode_tx_unsigned(tx);
    write_optional(&mut out, tx.signature.as_ref().map(|s| s.as_slice()));
    out
}

fn read_tx(input: &mut &[u8]) -> Result<Transaction, CodecError> {
    let from = match read_u8(input)? {
        TAG_COINBASE => None,
        TAG_TRANSFER => Some(read_address(input)?),
        other => return Err(CodecError::InvalidTag(other)),
    };
    let to = read_address(input)?;
    let amount = read_u64_le(input)?;
    let fee = read_u64_le(input)?;
    let nonce = read_u64_le(input)?;
    let timestamp = read_u64_le(input)?;
    let public_key: Option<PublicKeyBytes> = read_optional(input)?;

    Ok(Transaction {
        from,
        to,
        amount,
        fee,
        nonce,
        timestamp,
        public_key,
        signature: None,
    })
}

pub fn decode_tx_unsigned(bytes: &[u8]) -> Result<Transaction, CodecError> {
    let mut input = bytes;
    let tx = read_tx(&mut input)?;
    if !input.is_empty() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(tx)
}

pub fn decode_tx_signed(bytes: &[u8]) -> Result<Transaction, CodecError> {
    let mut input = bytes;
    let mut tx = read_tx(&mut input)?;
    let signature: Option<SignatureBytes> = read_optional(&mut input)?;
    if !input.is_empty() {
        return Err(CodecError::TrailingBytes);
    }
    tx.signature = signature;
    Ok(tx)
}

/// Content identity of a transaction: blake3 over the unsigned encoding,
/// so re-encoding a signature can never change it.
pub fn txid(tx: &Transaction) -> TxId {
    *blake3::hash(&encode_tx_unsigned(tx)).as_bytes()
}

/// Commitment to an ordered transaction list, signatures included.
pub fn transactions_digest(txs: &[Transaction]) -> Hash32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(txs.len() as u64).to_le_bytes());
    for tx in txs {
        hasher.update(&encode_tx_signed(tx));
    }
    *hasher.finalize().as_bytes()
}

/// Bytes hashed for proof-of-work: every block field except `hash`,
/// with the transactions folded into `digest`.
pub fn encode_block_header(block: &Block, digest: &Hash32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 8 + 32 + 32 + 8);
    write_u64_le(&mut out, block.index);
    write_u64_le(&mut out, block.timestamp);
    out.extend_from_slice(digest);
    out.extend_from_slice(&block.prev_hash);
    write_u64_le(&mut out, block.nonce);
    out
}

/// Block hash given a precomputed transactions digest; the miner uses this
/// to avoid rehashing the transactions for every nonce.
pub fn block_hash_with_digest(block: &Block, digest: &Hash32) -> Hash32 {
    *blake3::hash(&encode_block_header(block, digest)).as_bytes()
}

pub fn block_hash(block: &Block) -> Hash32 {
    block_hash_with_digest(block, &transactions_digest(&block.transactions))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; ADDRESS_LEN])
    }

    fn signed_transfer() -> Transaction {
        let mut tx = Transaction::transfer(addr(1), addr(2), 30, 2, 4, 1_700_000_000);
        tx.public_key = Some([5u8; 32]);
        tx.signature = Some([6u8; 64]);
        tx
    }

    #[test]
    fn txid_ignores_signature() {
        let tx = signed_transfer();
        let mut resigned = tx.clone();
        resigned.signature = Some([7u8; 64]);
        assert_eq!(txid(&tx), txid(&resigned));

        let mut bumped = tx.clone();
        bumped.fee += 1;
        assert_ne!(txid(&tx), txid(&bumped));
    }

    #[test]
    fn signed_decode_restores_every_field() {
        let tx = signed_transfer();
        let decoded = decode_tx_signed(&encode_tx_signed(&tx)).unwrap();
        assert_eq!(decoded, tx);

        let coinbase = Transaction::coinbase(addr(9), 50, 0);
        let decoded = decode_tx_signed(&encode_tx_signed(&coinbase)).unwrap();
        assert_eq!(decoded, coinbase);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        let bytes = encode_tx_signed(&signed_transfer());

        assert_eq!(
            decode_tx_signed(&bytes[..bytes.len() - 1]),
            Err(CodecError::UnexpectedEof)
        );

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert_eq!(decode_tx_signed(&trailing), Err(CodecError::TrailingBytes));

        let mut bad_tag = bytes.clone();
        bad_tag[0] = 7;
        assert_eq!(decode_tx_signed(&bad_tag), Err(CodecError::InvalidTag(7)));

        // signed bytes are not a valid unsigned encoding
        assert_eq!(decode_tx_unsigned(&bytes), Err(CodecError::TrailingBytes));
    }

    #[test]
    fn digest_commits_to_order_and_signatures() {
        let a = signed_transfer();
        let mut b = signed_transfer();
        b.nonce += 1;

        let ab = transactions_digest(&[a.clone(), b.clone()]);
        assert_ne!(ab, transactions_digest(&[b.clone(), a.clone()]));

        let mut a_resigned = a.clone();
        a_resigned.signature = Some([0xff; 64]);
        assert_ne!(ab, transactions_digest(&[a_resigned, b]));
    }

    #[test]
    fn block_hash_covers_header_fields() {
        let block = Block::new(1, 10, [3u8; 32], vec![signed_transfer()]);
        let base = block_hash(&block);

        let mut nonce = block.clone();
        nonce.nonce = 1;
        assert_ne!(base, block_hash(&nonce));

        let mut prev = block.clone();
        prev.prev_hash[31] ^= 1;
        assert_ne!(base, block_hash(&prev));

        // the stored hash is not an input
        let mut stored = block.clone();
        stored.hash = [0xaa; 32];
        assert_eq!(base, block_hash(&stored));
    }
}
