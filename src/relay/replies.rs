use crate::error::ErrorCode;

pub const REPLY_ATTACHED: &str = "✅ Listo — aquí tienes tu archivo.";
pub const REPLY_TIMEOUT: &str =
    "❌ ERROR 101: La descarga ha tardado más de 5 minutos y ha sido cancelada.";
pub const REPLY_DOWNLOAD_FAILED: &str =
    "❌ ERROR 102: No se pudo descargar el enlace. Puede ser inválido o estar protegido.";
pub const REPLY_PUBLISH_FAILED: &str = "❌ ERROR 103: No se pudo publicar el archivo online.";
pub const REPLY_INTERNAL: &str = "❌ ERROR 110: Error interno al procesar tu solicitud.";

pub fn hosted_reply(url: &str) -> String {
    format!("✅ Archivo demasiado grande para adjuntar.\n🔗 Enlace temporal (expira en 1 hora): {url}")
}

/// The busy code is deliberately silent: callers get `None` and send nothing.
pub fn reply_for_code(code: ErrorCode) -> Option<&'static str> {
    match code {
        ErrorCode::Busy => None,
        ErrorCode::DownloadTimeout => Some(REPLY_TIMEOUT),
        ErrorCode::DownloadFailed => Some(REPLY_DOWNLOAD_FAILED),
        ErrorCode::PublishFailed => Some(REPLY_PUBLISH_FAILED),
        ErrorCode::Internal => Some(REPLY_INTERNAL),
    }
}
