use std::panic::{self, AssertUnwindSafe};

use log::warn;

use crate::engine::HashEngine;
use crate::errors::{HashError, ImageError, Result};
use crate::image::ImageView;

/// Runs `walk` over `view`, turning any fault raised while touching the mapping into
/// [`ImageError::ExceptionInProcess`].
///
/// Faults come either from a bounds-checked read failing or from the mapping itself
/// panicking. Either way the view records the error and `engine` ends up failed, so no
/// digest is left behind.
pub(crate) fn guarded<T, F>(view: &ImageView, engine: &mut HashEngine, walk: F) -> Result<T>
where
    F: FnOnce(&ImageView, &mut HashEngine) -> Result<T>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| walk(view, &mut *engine)));

    let result = match outcome {
        Ok(result) => result,
        Err(_) => {
            warn!("fault while walking the image mapping");
            Err(HashError::Image(ImageError::ExceptionInProcess))
        }
    };

    if let Err(ref err) = result {
        if let HashError::Image(image_error) = err {
            view.set_last_error(*image_error);
        }
        engine.fail();
    }
    result
}
