// Steptrace - EVM Execution Trace Reconstruction
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

/// Gas bookkeeping for one call or create context
///
/// The four readings bracket the context from the parent's point of view:
/// the parent's gas at the opcode that opened it, the context's gas at its
/// first instruction, its gas at its last instruction, and the parent's gas at
/// the instruction after it returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GasWindow {
    pub(crate) left_before_enter: u64,
    pub(crate) left_just_after_enter: Option<u64>,
    pub(crate) left_before_exit: Option<u64>,
    pub(crate) left_just_after_exit: Option<u64>,
}

impl GasWindow {
    pub(crate) fn open(left_before_enter: u64) -> Self {
        Self { left_before_enter, ..Default::default() }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.left_just_after_exit.is_some()
    }

    /// Gas the parent lost across the context, `None` while it is still open.
    ///
    /// Saturates at zero; a producer reporting more gas after the exit than
    /// before the entry yields a zero spend.
    pub(crate) fn gas_spent(&self) -> Option<u64> {
        self.left_just_after_exit.map(|after| self.left_before_enter.saturating_sub(after))
    }

    /// Gas burnt by the context's own instructions
    pub(crate) fn gas_used_inside(&self) -> Option<u64> {
        Some(self.left_just_after_enter?.saturating_sub(self.left_before_exit?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_lifecycle() {
        let mut window = GasWindow::open(99_000);
        assert!(!window.is_closed());
        assert_eq!(window.gas_spent(), None);

        window.left_just_after_enter = Some(50_000);
        window.left_before_exit = Some(49_900);
        window.left_just_after_exit = Some(97_000);
        assert!(window.is_closed());
        assert_eq!(window.gas_spent(), Some(2_000));
        assert_eq!(window.gas_used_inside(), Some(100));
    }

    #[test]
    fn test_spent_saturates() {
        let window = GasWindow { left_just_after_exit: Some(10), ..GasWindow::open(5) };
        assert_eq!(window.gas_spent(), Some(0));
        assert_eq!(window.gas_used_inside(), None);
    }
}
