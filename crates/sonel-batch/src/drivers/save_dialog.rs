use super::DriverContext;
use crate::detector::csv_file_name;
use crate::element::{ControlRole, UIElement};
use crate::errors::ExtractError;
use crate::locale::UiToken;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// Fill in and confirm the analyzer's save dialog.
pub(super) struct SaveDialog<'a> {
    ctx: DriverContext<'a>,
}

impl<'a> SaveDialog<'a> {
    pub(super) fn new(ctx: DriverContext<'a>) -> Self {
        Self { ctx }
    }

    fn has_save_button(&self, window: &UIElement) -> bool {
        window
            .descendants(Some(ControlRole::Button))
            .map(|buttons| {
                buttons
                    .iter()
                    .any(|b| self.ctx.locale.matches(&b.name_or_empty(), UiToken::Save))
            })
            .unwrap_or(false)
    }

    /// The file name edit sits in the dialog's default "Pictures" group; any
    /// edit will do when that group is missing.
    fn file_name_edit(&self, dialog: &UIElement) -> Option<UIElement> {
        let edits = self
            .ctx
            .desktop
            .find_descendants(dialog, ControlRole::Edit)
            .ok()?;
        let in_pictures = edits.iter().find(|edit| {
            edit.parent()
                .ok()
                .flatten()
                .map(|parent| {
                    self.ctx
                        .locale
                        .matches(&parent.name_or_empty(), UiToken::Pictures)
                })
                .unwrap_or(false)
        });
        match in_pictures {
            Some(edit) => Some(edit.clone()),
            None => {
                debug!("no edit under a pictures group, using the first edit");
                edits.into_iter().next()
            }
        }
    }

    fn target_path(&self, stem: &str) -> PathBuf {
        let export_dir = &self.ctx.config.export_dir;
        let dir = std::path::absolute(export_dir).unwrap_or_else(|_| export_dir.clone());
        dir.join(csv_file_name(stem))
    }

    /// Returns the path typed into the dialog. Only finding the dialog and
    /// filling the name can fail; the save click itself is not checked.
    #[instrument(skip(self, top_window), fields(sub_phase = "save dialog"))]
    pub(super) fn save_as(&self, top_window: &UIElement, stem: &str) -> Result<PathBuf, ExtractError> {
        let desktop = self.ctx.desktop;
        let waiter = self.ctx.waiter();
        let timeout = self.ctx.config.delays.window_activation();

        let dialog = waiter
            .wait_dialog(
                top_window,
                |w| w.is_visible().unwrap_or(false) && self.has_save_button(w),
                timeout,
            )
            .ok_or_else(|| {
                if desktop.cancel_flag().is_cancelled() {
                    return ExtractError::Interrupted;
                }
                desktop.dump_tree("save dialog lookup", top_window);
                ExtractError::SaveDialog(format!("no save dialog within {timeout:?}"))
            })?;
        info!("save dialog found: {:?}", dialog.name_or_empty());

        let edit = self.file_name_edit(&dialog).ok_or_else(|| {
            desktop.dump_tree("file name edit lookup", &dialog);
            ExtractError::SaveDialog("file name edit not found".to_string())
        })?;

        let target = self.target_path(stem);
        let typed = target.to_string_lossy().to_string();
        desktop.set_clipboard(&typed)?;
        if let Err(e) = desktop.set_focus(&edit) {
            warn!("cannot focus file name edit: {e}");
        }
        desktop.double_click(&edit)?;
        desktop.replace_focused_with_clipboard()?;
        debug!("file name set to {typed}");

        let save = desktop
            .find_by_text(&dialog, &[ControlRole::Button], |text| {
                self.ctx.locale.matches(text, UiToken::Save)
            })?
            .ok_or_else(|| ExtractError::SaveDialog("save button vanished".to_string()))?;
        if let Err(e) = desktop.invoke(&save) {
            warn!("save button invocation reported {e}; relying on file verification");
        }
        Ok(target)
    }
}
