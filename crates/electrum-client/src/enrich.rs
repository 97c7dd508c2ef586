//! Transaction enrichment: join every input with the output it spends.
//!
//! Prevouts are looked up cache-first; the ones missing from the cache are
//! fetched with a single batched verbose `blockchain.transaction.get`, so an
//! n-input transaction costs at most one round trip.

use std::collections::HashMap;

use serde_json::{json, Value};

use electrum_core::ClientError;

use crate::client::ElectrumClient;
use crate::types::{RichTx, VerboseTx, VinWithPrevout, Vout};

impl ElectrumClient {
    /// The `index`-th output of a transaction.
    pub async fn transaction_output(
        &self,
        tx_hash: &str,
        index: u32,
    ) -> Result<Vout, ClientError> {
        let tx = self.transaction_get_verbose(tx_hash).await?;
        tx.vout
            .get(index as usize)
            .cloned()
            .ok_or_else(|| ClientError::Protocol {
                context: format!("transaction {tx_hash} has no output {index}"),
            })
    }

    /// Enrich a verbose transaction with its prevouts and totals.
    ///
    /// Coinbase inputs carry no prevout and contribute nothing to the input
    /// total; the fee of a pure coinbase transaction is 0.
    pub async fn enrich_transaction(&self, tx: &VerboseTx) -> Result<RichTx, ClientError> {
        let prevouts = self.fetch_prevout_transactions(tx).await?;

        let mut vin = Vec::with_capacity(tx.vin.len());
        let mut inputs_total = 0.0;
        let mut spends_outputs = false;
        for input in &tx.vin {
            if input.is_coinbase() {
                vin.push(VinWithPrevout {
                    vin: input.clone(),
                    prevout: None,
                });
                continue;
            }
            spends_outputs = true;
            let prev = prevouts
                .get(&input.txid)
                .ok_or_else(|| ClientError::Protocol {
                    context: format!("missing prevout transaction {}", input.txid),
                })?;
            let prevout = prev
                .vout
                .get(input.vout as usize)
                .cloned()
                .ok_or_else(|| ClientError::Protocol {
                    context: format!(
                        "transaction {} has no output {}",
                        input.txid, input.vout
                    ),
                })?;
            inputs_total += prevout.value;
            vin.push(VinWithPrevout {
                vin: input.clone(),
                prevout: Some(prevout),
            });
        }

        let outputs_total: f64 = tx.vout.iter().map(|v| v.value).sum();
        let fee = if spends_outputs {
            inputs_total - outputs_total
        } else {
            0.0
        };

        Ok(RichTx {
            tx: tx.clone(),
            vin,
            inputs_total,
            outputs_total,
            fee,
        })
    }

    /// Resolve the distinct prevout transactions of `tx`, cache-first, then
    /// one batch for the rest.
    async fn fetch_prevout_transactions(
        &self,
        tx: &VerboseTx,
    ) -> Result<HashMap<String, VerboseTx>, ClientError> {
        let mut resolved: HashMap<String, VerboseTx> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        for input in &tx.vin {
            if input.is_coinbase()
                || resolved.contains_key(&input.txid)
                || missing.contains(&input.txid)
            {
                continue;
            }
            match self.cache.lock().get(&input.txid) {
                Some(value) => {
                    let prev: VerboseTx = serde_json::from_value(value)
                        .map_err(|e| ClientError::Decode(e.to_string()))?;
                    resolved.insert(input.txid.clone(), prev);
                }
                None => missing.push(input.txid.clone()),
            }
        }

        if missing.is_empty() {
            return Ok(resolved);
        }

        let params: Vec<Vec<Value>> = missing
            .iter()
            .map(|txid| vec![json!(txid), json!(true)])
            .collect();
        let calls: Vec<(&str, Vec<Value>)> = params
            .into_iter()
            .map(|p| ("blockchain.transaction.get", p))
            .collect();
        let responses = self.session().call_batch(&calls).await?;

        for (txid, response) in missing.into_iter().zip(responses) {
            if let Some(error) = response.error {
                return Err(ClientError::Server {
                    code: error.code,
                    message: error.message,
                });
            }
            let result = response.result.ok_or_else(|| ClientError::Protocol {
                context: format!("prevout response for {txid} carries no result"),
            })?;
            let prev: VerboseTx = serde_json::from_value(result.clone())
                .map_err(|e| ClientError::Decode(e.to_string()))?;
            self.cache.lock().insert(&txid, prev.confirmations, result);
            resolved.insert(txid, prev);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{RichTx, ScriptPubKey, VerboseTx, Vin, VinWithPrevout, Vout};

    fn output(n: u32, value: f64) -> Vout {
        Vout {
            n,
            value,
            script_pub_key: ScriptPubKey::default(),
        }
    }

    #[test]
    fn rich_tx_totals_shape() {
        // The arithmetic the enricher produces: inputs - outputs = fee.
        let tx = VerboseTx {
            txid: "t1".into(),
            vout: vec![output(0, 0.4), output(1, 0.55)],
            ..VerboseTx::default()
        };
        let rich = RichTx {
            tx: tx.clone(),
            vin: vec![VinWithPrevout {
                vin: Vin {
                    txid: "t0".into(),
                    vout: 0,
                    ..Vin::default()
                },
                prevout: Some(output(0, 1.0)),
            }],
            inputs_total: 1.0,
            outputs_total: 0.95,
            fee: 0.05,
        };
        assert!((rich.inputs_total - rich.outputs_total - rich.fee).abs() < f64::EPSILON);
        assert_eq!(rich.tx.txid, "t1");
    }

    #[test]
    fn coinbase_vin_has_no_prevout() {
        let joined = VinWithPrevout {
            vin: Vin {
                coinbase: "04ffff001d".into(),
                ..Vin::default()
            },
            prevout: None,
        };
        assert!(joined.vin.is_coinbase());
        assert!(joined.prevout.is_none());
    }
}
