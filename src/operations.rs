//! Operation registry: which action tokens the agent may emit, how each one
//! is executed, and which textual aliases name it.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::narsese::{ActionToken, Codec};
use crate::transport::Transport;

#[async_trait]
pub trait Effector: Send + Sync {
    async fn execute(&self, token: ActionToken, transport: &Transport) -> Result<(), TransportError>;
}

/// Sends the token's wire form to the environment's command address.
#[derive(Debug, Clone, Copy)]
pub struct SendToken {
    pub destination: SocketAddr,
}

#[async_trait]
impl Effector for SendToken {
    async fn execute(&self, token: ActionToken, transport: &Transport) -> Result<(), TransportError> {
        transport.send_text(token.wire(), self.destination).await?;
        Ok(())
    }
}

pub struct Operation {
    pub effector: Box<dyn Effector>,
    pub aliases: BTreeSet<String>,
}

#[derive(Default)]
pub struct OperationRegistry {
    ops: BTreeMap<ActionToken, Operation>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `^up`, `^down`, `^hold`, each sent to `destination`.
    pub fn standard(destination: SocketAddr) -> Self {
        let mut reg = Self::new();
        for token in ActionToken::ALL {
            reg.register(
                token,
                Box::new(SendToken { destination }),
                &[token.wire(), token.name()],
            );
        }
        reg
    }

    pub fn register(&mut self, token: ActionToken, effector: Box<dyn Effector>, aliases: &[&str]) {
        let mut set: BTreeSet<String> = aliases.iter().map(|a| a.trim().to_string()).collect();
        set.insert(token.wire().to_string());
        self.ops.insert(token, Operation { effector, aliases: set });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Registered tokens in stable order.
    pub fn candidates(&self) -> Vec<ActionToken> {
        self.ops.keys().copied().collect()
    }

    pub fn resolve(&self, alias: &str) -> Option<ActionToken> {
        let alias = alias.trim();
        self.ops
            .iter()
            .find(|(_, op)| op.aliases.contains(alias))
            .map(|(token, _)| *token)
    }

    /// Codec that knows exactly the registered aliases.
    pub fn codec(&self) -> Codec {
        let mut codec = Codec::empty();
        for (token, op) in &self.ops {
            for alias in &op.aliases {
                codec.add_alias(alias, *token);
            }
        }
        codec
    }

    /// Run the registered effector. Unregistered tokens are a no-op (`Ok(false)`).
    pub async fn execute(&self, token: ActionToken, transport: &Transport) -> Result<bool, TransportError> {
        match self.ops.get(&token) {
            Some(op) => {
                op.effector.execute(token, transport).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narsese::Statement;

    fn addr() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    #[test]
    fn standard_registry_has_three_ops() {
        let reg = OperationRegistry::standard(addr());
        assert_eq!(
            reg.candidates(),
            vec![ActionToken::Up, ActionToken::Down, ActionToken::Hold]
        );
        assert_eq!(reg.resolve("up"), Some(ActionToken::Up));
        assert_eq!(reg.resolve("^hold"), Some(ActionToken::Hold));
        assert_eq!(reg.resolve("sideways"), None);
    }

    #[test]
    fn custom_aliases_reach_codec() {
        let mut reg = OperationRegistry::new();
        reg.register(ActionToken::Up, Box::new(SendToken { destination: addr() }), &["raise"]);
        let codec = reg.codec();
        assert_eq!(codec.decode("raise").unwrap(), Statement::Action(ActionToken::Up));
        assert_eq!(codec.decode("^up").unwrap(), Statement::Action(ActionToken::Up));
        assert!(codec.decode("^down").is_err());
        assert_eq!(reg.candidates(), vec![ActionToken::Up]);
    }

    #[tokio::test]
    async fn send_token_effector_emits_wire_form() {
        let env = Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let agent = Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let reg = OperationRegistry::standard(env.local_addr());
        assert!(reg.execute(ActionToken::Down, &agent).await.unwrap());
        let dg = env.receive(64).await.unwrap();
        assert_eq!(dg.text(), "^down");
    }
}
