//! Post-processing hand-off
//!
//! After the 3D scene of the main view is complete, the scene buffer runs
//! through a short chain of full-screen effects before it is presented:
//!
//! 1. bloom (optional)
//! 2. tone mapping (HDR output)
//! 3. colormap blend (fullbright colormaps such as invulnerability)
//! 4. the caller's 2D overlay
//! 5. copy to the presentation image
//!
//! Effects are recorded as screen quads inside named debug groups so
//! capture tools show the chain structure.

use crate::renderer::commands::{CommandRecorder, RenderCommand};
use crate::renderer::settings::RendererSettings;

#[derive(Debug, Default)]
pub struct PostProcessState {
    group_depth: u32,
}

impl PostProcessState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_group(&mut self, recorder: &mut CommandRecorder, name: &str) {
        recorder.push(RenderCommand::PushGroup(name.to_owned()));
        self.group_depth += 1;
    }

    pub fn pop_group(&mut self, recorder: &mut CommandRecorder) {
        if self.group_depth == 0 {
            log::warn!("pop_group without a matching push_group");
            return;
        }
        self.group_depth -= 1;
        recorder.push(RenderCommand::PopGroup);
    }

    #[inline]
    #[must_use]
    pub fn group_depth(&self) -> u32 {
        self.group_depth
    }

    /// Full-screen triangle pair running `effect`. With `stencil_test` the
    /// quad only touches pixels whose stencil matches the current level.
    pub fn draw_screen_quad(&self, recorder: &mut CommandRecorder, effect: &'static str, stencil_test: bool) {
        recorder.push(RenderCommand::DrawScreenQuad { effect, stencil_test });
    }

    /// Runs the effect chain, then `overlay`, then the present copy.
    pub fn post_process_scene(
        &mut self,
        recorder: &mut CommandRecorder,
        settings: &RendererSettings,
        colormap: bool,
        overlay: impl FnOnce(&mut CommandRecorder),
    ) {
        self.push_group(recorder, "PostProcessScene");
        if settings.bloom {
            self.push_group(recorder, "Bloom");
            for effect in ["bloom_extract", "bloom_blur_h", "bloom_blur_v", "bloom_combine"] {
                self.draw_screen_quad(recorder, effect, false);
            }
            self.pop_group(recorder);
        }
        if settings.hdr {
            self.draw_screen_quad(recorder, "tonemap", false);
        }
        if colormap {
            self.draw_screen_quad(recorder, "colormap", false);
        }
        self.pop_group(recorder);

        overlay(recorder);

        self.push_group(recorder, "Present");
        self.draw_screen_quad(recorder, "present", false);
        self.pop_group(recorder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effects(recorder: &CommandRecorder) -> Vec<&'static str> {
        recorder
            .commands()
            .iter()
            .filter_map(|c| match c {
                RenderCommand::DrawScreenQuad { effect, .. } => Some(*effect),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn chain_runs_in_order_and_balances_groups() {
        let settings = RendererSettings {
            bloom: true,
            hdr: true,
            ..RendererSettings::default()
        };
        let mut recorder = CommandRecorder::new();
        let mut pp = PostProcessState::new();
        pp.post_process_scene(&mut recorder, &settings, true, |r| {
            r.push(RenderCommand::ClearDepth);
        });

        assert_eq!(
            effects(&recorder),
            vec![
                "bloom_extract",
                "bloom_blur_h",
                "bloom_blur_v",
                "bloom_combine",
                "tonemap",
                "colormap",
                "present"
            ]
        );
        assert_eq!(pp.group_depth(), 0);

        let overlay = recorder.position(|c| *c == RenderCommand::ClearDepth).unwrap();
        let colormap = recorder
            .position(|c| matches!(c, RenderCommand::DrawScreenQuad { effect: "colormap", .. }))
            .unwrap();
        assert!(colormap < overlay);
    }

    #[test]
    fn unbalanced_pop_is_ignored() {
        let mut recorder = CommandRecorder::new();
        let mut pp = PostProcessState::new();
        pp.pop_group(&mut recorder);
        assert!(recorder.is_empty());
    }
}
