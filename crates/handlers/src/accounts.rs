//! Account activity and transfers from bank messages.

use chronicle_core::models::{AccountActivity, Transfer};
use chronicle_core::ports::RawTx;

use crate::messages::{MsgMultiSend, MsgSend};

#[derive(Debug, Default)]
pub struct AccountCollector {
    pub activity: Vec<AccountActivity>,
    pub transfers: Vec<Transfer>,
}

impl AccountCollector {
    fn touch(&mut self, tx: &RawTx, address: &str) {
        let seen = self
            .activity
            .iter()
            .any(|a| a.address == address && a.tx_hash == tx.hash);
        if !seen {
            self.activity.push(AccountActivity {
                address: address.to_string(),
                tx_hash: tx.hash.clone(),
                height: tx.height,
                timestamp: tx.timestamp,
            });
        }
    }

    pub fn send(&mut self, tx: &RawTx, msg: &MsgSend) {
        self.touch(tx, &msg.from_address);
        self.touch(tx, &msg.to_address);
        self.transfers.push(Transfer {
            tx_hash: tx.hash.clone(),
            height: tx.height,
            from: msg.from_address.clone(),
            to: msg.to_address.clone(),
            amount: msg.amount.clone(),
            timestamp: tx.timestamp,
        });
    }

    /// Every input and output is active; transfers pair the first input with each output.
    pub fn multi_send(&mut self, tx: &RawTx, msg: &MsgMultiSend) {
        for io in msg.inputs.iter().chain(&msg.outputs) {
            self.touch(tx, &io.address);
        }
        let Some(sender) = msg.inputs.first() else {
            return;
        };
        for output in &msg.outputs {
            self.transfers.push(Transfer {
                tx_hash: tx.hash.clone(),
                height: tx.height,
                from: sender.address.clone(),
                to: output.address.clone(),
                amount: output.coins.clone(),
                timestamp: tx.timestamp,
            });
        }
    }
}
