use crate::index::{BlockDiff, IndexError, Outpoint, Utxo};
use crate::node::{DecodedTransaction, FetchedBlock, InputRef, TxOutput};
use crate::utils::value_to_minor_units;
use tracing::{debug, error};

/// Resolve the address an output pays to.
///
/// Returns `None` for null-data outputs. Every other output must carry exactly
/// one address; anything else is an unsupported script and must not be indexed.
pub fn payable_address(output: &TxOutput) -> Result<Option<&str>, IndexError> {
	if output.script_pub_key.is_null_data() {
		return Ok(None);
	}

	match output.script_pub_key.resolved_addresses().as_slice() {
		[address] => Ok(Some(*address)),
		addresses => Err(IndexError::Validation(format!(
			"output {} of type {} resolves to {} addresses",
			output.n,
			output.script_pub_key.script_type,
			addresses.len()
		))),
	}
}

/// Compute the UTXO creations and deletions of one block
pub fn diff_block(block: &FetchedBlock) -> Result<BlockDiff, IndexError> {
	let mut diff = BlockDiff {
		height: block.height,
		block_hash: block.hash.clone(),
		..Default::default()
	};

	for tx in &block.transactions {
		diff_transaction(tx, block.height, &mut diff).map_err(|e| {
			error!(
				"[DIFF_BLOCK] Rejecting transaction {} in block {}: {}",
				tx.txid, block.height, e
			);
			e
		})?;
	}

	debug!(
		"Block {} creates {} and spends {} outputs",
		block.height,
		diff.new_utxos.len(),
		diff.del_utxos.len()
	);

	Ok(diff)
}

fn diff_transaction(
	tx: &DecodedTransaction,
	height: u64,
	diff: &mut BlockDiff,
) -> Result<(), IndexError> {
	for output in &tx.vout {
		let Some(address) = payable_address(output)? else {
			continue;
		};
		diff.new_utxos.push(Utxo {
			outpoint: Outpoint::new(tx.txid.clone(), output.n),
			height,
			address: address.to_string(),
			amount: value_to_minor_units(&output.value)?,
		});
	}

	for input in &tx.vin {
		match input
			.classify()
			.map_err(|e| IndexError::Validation(e.to_string()))?
		{
			InputRef::Coinbase => {}
			InputRef::Spend { txid, vout } => diff.del_utxos.push(Outpoint::new(txid, vout)),
		}
	}

	Ok(())
}
