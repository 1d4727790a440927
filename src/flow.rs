//! Hardware flow steering: one src-IP match-and-queue rule per expected source, plus
//! a lower-priority catch-all drop so traffic from anyone else never reaches a worker
//! core. Grounded on `FlowControl.cpp::generate_ipv4_flow`/`generate_drop_flow` — the
//! validate-then-create two-step there is mirrored by requiring callers to resolve
//! [`NicPort::flow_create_ipv4_steer`] failures into [`EngineError::FlowRuleRejected`]
//! before any rule is considered installed.

use crate::dpdk::{FlowRuleId, NicPort};
use crate::error::{EngineError, QueueId};

/// One configured source this port's flow table should steer.
#[derive(Debug, Clone, Copy)]
pub struct SteerTarget {
	pub rx_q: QueueId,
	pub src_ip: u32,
}

/// Installs and tracks the hardware flow rules for a single port: one steering rule
/// per [`SteerTarget`], plus a trailing drop-all rule.
#[derive(Default)]
pub struct FlowRuleEngine {
	steer_rules: Vec<FlowRuleId>,
	drop_rule: Option<FlowRuleId>,
}

impl FlowRuleEngine {
	pub fn new() -> Self {
		FlowRuleEngine::default()
	}

	/// Installs a steering rule for `target`. A full (`/32`) source-IP mask, since
	/// each expected source is matched individually.
	pub fn steer_src_ip(&mut self, port: &mut dyn NicPort, target: SteerTarget) -> Result<(), EngineError> {
		let id = port.flow_create_ipv4_steer(target.rx_q, target.src_ip, u32::MAX)?;
		self.steer_rules.push(id);
		Ok(())
	}

	/// Installs the catch-all drop rule. Must run after every [`Self::steer_src_ip`]
	/// call so the drop rule's lower priority only catches what the steering rules
	/// didn't claim.
	pub fn drop_remainder(&mut self, port: &mut dyn NicPort) -> Result<(), EngineError> {
		let id = port.flow_create_drop_all()?;
		self.drop_rule = Some(id);
		Ok(())
	}

	/// Removes every rule this engine has installed on `port`.
	pub fn flush(&mut self, port: &mut dyn NicPort) -> Result<(), EngineError> {
		port.flow_flush()?;
		self.steer_rules.clear();
		self.drop_rule = None;
		Ok(())
	}

	pub fn installed_rule_count(&self) -> usize {
		self.steer_rules.len() + self.drop_rule.is_some() as usize
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dpdk::fake::{FakeFlowRule, FakePort};

	#[test]
	fn steering_then_drop_installs_rules_in_order() {
		let mut port = FakePort::new(0, [0; 6]);
		let mut engine = FlowRuleEngine::new();
		engine.steer_src_ip(&mut port, SteerTarget { rx_q: 0, src_ip: 0x0a49_8b1b }).unwrap();
		engine.drop_remainder(&mut port).unwrap();

		assert_eq!(engine.installed_rule_count(), 2);
		let rules: Vec<_> = port.installed_flow_rules().cloned().collect();
		assert!(matches!(rules[0], FakeFlowRule::Ipv4Steer { src_ip: 0x0a49_8b1b, .. }));
		assert!(matches!(rules[1], FakeFlowRule::DropAll));
	}

	#[test]
	fn flush_clears_bookkeeping_and_hardware_state() {
		let mut port = FakePort::new(0, [0; 6]);
		let mut engine = FlowRuleEngine::new();
		engine.steer_src_ip(&mut port, SteerTarget { rx_q: 0, src_ip: 1 }).unwrap();
		engine.drop_remainder(&mut port).unwrap();
		engine.flush(&mut port).unwrap();
		assert_eq!(engine.installed_rule_count(), 0);
		assert_eq!(port.installed_flow_rules().count(), 0);
	}
}
