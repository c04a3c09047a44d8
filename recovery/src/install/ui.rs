// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

/// Background shown behind the progress bar.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackgroundIcon {
    None,
    Installing,
    Error,
}

/// User-facing surface for an install. Implementations decide how progress
/// and messages are actually presented.
pub trait Ui {
    fn print(&mut self, text: &str);

    /// Start a progress segment covering `fraction` of the bar that is
    /// expected to take `seconds`.
    fn show_progress(&mut self, fraction: f32, seconds: u32);

    /// Set progress within the current segment.
    fn set_progress(&mut self, fraction: f32);

    fn show_indeterminate_progress(&mut self);

    fn reset_progress(&mut self);

    fn set_background(&mut self, icon: BackgroundIcon);

    /// Ask a yes/no question. Returns true only if the user picked `yes`.
    fn confirm(&mut self, question: &str, yes: &str) -> bool;
}
