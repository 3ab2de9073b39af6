use crate::config::MotionConfig;
use crate::direction::{DirectionEstimator, DisplayRotation, SharedDisplayRotation};
use crate::error::{throw_java_exception, MotionError, MotionResult};
use crate::relay::{
    graph_result, CollaboratorError, CollaboratorResult, DialogButton, DialogRequest,
    HostRequests, HttpMethod, PermissionKind, PermissionState, Relay, RequestId,
};
use crate::sensor_receiver::{SensorAvailability, SensorType};
use jni::objects::{JByteArray, JClass, JFloatArray, JObject, JString, JValue};
use jni::sys::{jboolean, jint, jlong};
use jni::{JNIEnv, JavaVM};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};

struct EstimatorEntry {
    estimator: Arc<DirectionEstimator>,
    rotation: Arc<SharedDisplayRotation>,
}

// Global state - stored as static to persist across JNI calls
lazy_static::lazy_static! {
    static ref ESTIMATORS: Mutex<HashMap<jlong, EstimatorEntry>> = Mutex::new(HashMap::new());
    static ref NEXT_HANDLE: AtomicI64 = AtomicI64::new(1);
    /// Shared with game code that issues host requests
    pub static ref RELAY: Relay = Relay::new();
    static ref JAVA_HOST: Mutex<Option<Arc<JavaHost>>> = Mutex::new(None);
}

const APP_ACTIVITY: &str = "org/cocos2dx/cpp/AppActivity";

/// Host requests issued through the captured Java VM
struct JavaHost {
    vm: JavaVM,
}

impl JavaHost {
    fn call<F>(&self, f: F) -> MotionResult<()>
    where
        F: for<'local> FnOnce(&mut JNIEnv<'local>) -> MotionResult<()>,
    {
        let mut env = self.vm.attach_current_thread()?;
        let result = env.with_local_frame(16, f);
        if result.is_err() && env.exception_check().unwrap_or(false) {
            let _ = env.exception_describe();
            let _ = env.exception_clear();
        }
        result
    }

    fn facebook_manager<'local>(env: &mut JNIEnv<'local>) -> MotionResult<JObject<'local>> {
        let manager = env
            .call_static_method(APP_ACTIVITY, "getFacebookManager", "()Ljoaobapt/FacebookManager;", &[])?
            .l()?;
        if manager.is_null() {
            return Err(MotionError::Internal("no login manager".to_string()));
        }
        Ok(manager)
    }
}

fn java_id(id: RequestId) -> MotionResult<jlong> {
    jlong::try_from(id).map_err(|_| MotionError::Internal(format!("request id {} out of range", id)))
}

impl HostRequests for JavaHost {
    fn present_dialog(&self, id: RequestId, request: &DialogRequest) -> MotionResult<()> {
        let id = java_id(id)?;
        self.call(|env| {
            let activity = env
                .call_static_method(APP_ACTIVITY, "getActivity", "()Landroid/app/Activity;", &[])?
                .l()?;
            let listener = env.new_object("joaobapt/CommonAlertListener", "(J)V", &[JValue::Long(id)])?;
            let message = env.new_string(&request.message)?;
            let title = env.new_string(&request.title)?;
            let confirm = env.new_string(&request.confirm_caption)?;
            let cancel = env.new_string(&request.cancel_caption)?;
            env.call_method(
                &listener,
                "presentDialog",
                "(Landroid/app/Activity;Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;)V",
                &[
                    (&activity).into(),
                    (&message).into(),
                    (&title).into(),
                    (&confirm).into(),
                    (&cancel).into(),
                ],
            )?;
            Ok(())
        })
    }

    fn download_picture(&self, id: RequestId, url: &str) -> MotionResult<()> {
        let id = java_id(id)?;
        self.call(|env| {
            let url_text = env.new_string(url)?;
            let url = env.new_object("java/net/URL", "(Ljava/lang/String;)V", &[(&url_text).into()])?;
            let urls = env.new_object_array(1, "java/net/URL", &url)?;
            let task = env.new_object("joaobapt/PictureDownloader", "(J)V", &[JValue::Long(id)])?;
            env.call_method(
                &task,
                "execute",
                "([Ljava/lang/Object;)Landroid/os/AsyncTask;",
                &[(&urls).into()],
            )?;
            Ok(())
        })
    }

    fn request_permissions(
        &self,
        id: RequestId,
        kind: PermissionKind,
        rerequest: bool,
    ) -> MotionResult<()> {
        let id = java_id(id)?;
        let method = match kind {
            PermissionKind::Read => "requestReadPermissions",
            PermissionKind::Publish => "requestPublishPermissions",
        };
        self.call(|env| {
            let manager = Self::facebook_manager(env)?;
            env.call_method(&manager, method, "(JZ)V", &[JValue::Long(id), JValue::Bool(rerequest as jboolean)])?;
            Ok(())
        })
    }

    fn graph_request(
        &self,
        id: RequestId,
        path: &str,
        parameters: &BTreeMap<String, String>,
        method: HttpMethod,
    ) -> MotionResult<()> {
        let id = java_id(id)?;
        self.call(|env| {
            let bundle = env.new_object("android/os/Bundle", "()V", &[])?;
            for (key, value) in parameters {
                let key = env.new_string(key)?;
                let value = env.new_string(value)?;
                env.call_method(
                    &bundle,
                    "putString",
                    "(Ljava/lang/String;Ljava/lang/String;)V",
                    &[(&key).into(), (&value).into()],
                )?;
            }
            let path = env.new_string(path)?;
            let manager = Self::facebook_manager(env)?;
            env.call_method(
                &manager,
                "graphRequest",
                "(Ljava/lang/String;Landroid/os/Bundle;JJ)V",
                &[(&path).into(), (&bundle).into(), JValue::Long(method.code()), JValue::Long(id)],
            )?;
            Ok(())
        })
    }
}

fn java_host() -> MotionResult<Arc<JavaHost>> {
    JAVA_HOST
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or_else(|| MotionError::Internal("Java VM not captured; nativeInit has not run".to_string()))
}

/// Show a two-button alert; `handler` gets the pressed button.
pub fn present_dialog<F>(request: &DialogRequest, handler: F) -> MotionResult<RequestId>
where
    F: FnOnce(CollaboratorResult<DialogButton>) + Send + 'static,
{
    RELAY.present_dialog(&*java_host()?, request, handler)
}

pub fn download_picture<F>(url: &str, handler: F) -> MotionResult<RequestId>
where
    F: FnOnce(CollaboratorResult<Vec<u8>>) + Send + 'static,
{
    RELAY.download_picture(&*java_host()?, url, handler)
}

pub fn request_permissions<F>(kind: PermissionKind, rerequest: bool, handler: F) -> MotionResult<RequestId>
where
    F: FnOnce(CollaboratorResult<PermissionState>) + Send + 'static,
{
    RELAY.request_permissions(&*java_host()?, kind, rerequest, handler)
}

pub fn graph_request<F>(
    path: &str,
    parameters: &BTreeMap<String, String>,
    method: HttpMethod,
    handler: F,
) -> MotionResult<RequestId>
where
    F: FnOnce(CollaboratorResult<serde_json::Value>) + Send + 'static,
{
    RELAY.graph_request(&*java_host()?, path, parameters, method, handler)
}

static LOGGER_INIT: Once = Once::new();

fn init_logging() {
    LOGGER_INIT.call_once(|| {
        #[cfg(target_os = "android")]
        {
            let _ = android_log::init("MotionProcessor");
        }
        info!("Native motion library loaded");
    });
}

fn estimators() -> MutexGuard<'static, HashMap<jlong, EstimatorEntry>> {
    // A panicked holder leaves the table itself intact
    ESTIMATORS.lock().unwrap_or_else(PoisonError::into_inner)
}

fn get_estimator(handle: jlong) -> MotionResult<Arc<DirectionEstimator>> {
    estimators()
        .get(&handle)
        .map(|entry| Arc::clone(&entry.estimator))
        .ok_or(MotionError::UnknownHandle(handle))
}

fn insert_estimator(
    availability: SensorAvailability,
    config: MotionConfig,
) -> MotionResult<jlong> {
    let rotation = Arc::new(SharedDisplayRotation::new(DisplayRotation::Rotation0));
    let estimator = Arc::new(DirectionEstimator::with_config(
        availability,
        config,
        rotation.clone(),
    )?);

    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    estimators().insert(handle, EstimatorEntry { estimator, rotation });
    Ok(handle)
}

fn read_optional_string(env: &mut JNIEnv, value: &JString) -> MotionResult<Option<String>> {
    if value.is_null() {
        return Ok(None);
    }
    let text: String = env.get_string(value)?.into();
    Ok(Some(text))
}

fn read_floats(env: &mut JNIEnv, values: &JFloatArray) -> MotionResult<Vec<f32>> {
    if values.is_null() {
        return Err(MotionError::InvalidParameters("null sample array".to_string()));
    }
    let len = env.get_array_length(values)?;
    let mut buf = vec![0.0f32; len as usize];
    env.get_float_array_region(values, 0, &mut buf)?;
    Ok(buf)
}

/// JNI: One-time native setup (logging, Java VM for host requests)
#[no_mangle]
pub extern "C" fn Java_joaobapt_MotionProcessor_nativeInit(env: JNIEnv, _class: JClass) {
    init_logging();
    match env.get_java_vm() {
        Ok(vm) => {
            *JAVA_HOST.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(JavaHost { vm }));
        }
        Err(e) => warn!("Host requests unavailable: {}", e),
    }
}

/// JNI: Create an estimator with default tuning
/// Returns: handle (> 0)
#[no_mangle]
pub extern "C" fn Java_joaobapt_MotionProcessor_nativeCreate(
    mut env: JNIEnv,
    _class: JClass,
    has_fusion_sensor: jboolean,
    has_gyroscope: jboolean,
) -> jlong {
    init_logging();
    let availability = SensorAvailability::from_flags(has_fusion_sensor != 0, has_gyroscope != 0);
    match insert_estimator(availability, MotionConfig::default()) {
        Ok(handle) => handle,
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            0
        }
    }
}

/// JNI: Create an estimator from explicit sensor flags and a JSON config
/// Returns: handle (> 0), or 0 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_joaobapt_MotionProcessor_nativeCreateWithConfig(
    mut env: JNIEnv,
    _class: JClass,
    has_fusion_sensor: jboolean,
    has_accelerometer: jboolean,
    has_gyroscope: jboolean,
    has_magnetometer: jboolean,
    config_json: JString,
) -> jlong {
    init_logging();
    let availability = SensorAvailability {
        fused_rotation: has_fusion_sensor != 0,
        accelerometer: has_accelerometer != 0,
        gyroscope: has_gyroscope != 0,
        magnetometer: has_magnetometer != 0,
    };
    match create_with_config_impl(&mut env, availability, &config_json) {
        Ok(handle) => handle,
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            0
        }
    }
}

fn create_with_config_impl(
    env: &mut JNIEnv,
    availability: SensorAvailability,
    config_json: &JString,
) -> MotionResult<jlong> {
    let config = match read_optional_string(env, config_json)? {
        Some(json) => MotionConfig::from_json(&json)?,
        None => MotionConfig::default(),
    };
    insert_estimator(availability, config)
}

/// JNI: Forward one SensorEvent
/// Parameters: Android sensor type, event values, event timestamp (ns)
#[no_mangle]
pub extern "C" fn Java_joaobapt_MotionProcessor_nativeFeed(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    sensor_type: jint,
    values: JFloatArray,
    timestamp: jlong,
) {
    // Sample faults are never surfaced to the host
    if let Err(e) = feed_impl(&mut env, handle, sensor_type, &values, timestamp) {
        debug!("Dropping sample: {}", e);
    }
}

fn feed_impl(
    env: &mut JNIEnv,
    handle: jlong,
    sensor_type: jint,
    values: &JFloatArray,
    timestamp: jlong,
) -> MotionResult<()> {
    let sensor_type = SensorType::from_android(sensor_type)?;
    let values = read_floats(env, values)?;
    get_estimator(handle)?.feed_raw(sensor_type, &values, timestamp);
    Ok(())
}

/// JNI: Re-zero on the current orientation
#[no_mangle]
pub extern "C" fn Java_joaobapt_MotionProcessor_nativeCalibrate(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    match get_estimator(handle) {
        Ok(estimator) => estimator.calibrate(),
        Err(e) => warn!("Calibrate ignored: {}", e),
    }
}

/// JNI: Copy the direction vector into `out` ([dx, dy])
#[no_mangle]
pub extern "C" fn Java_joaobapt_MotionProcessor_nativeGetDirectionVector(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    out: JFloatArray,
) {
    if let Err(e) = get_direction_vector_impl(&mut env, handle, &out) {
        warn!("Direction vector unavailable: {}", e);
    }
}

fn get_direction_vector_impl(env: &mut JNIEnv, handle: jlong, out: &JFloatArray) -> MotionResult<()> {
    if out.is_null() || env.get_array_length(out)? < 2 {
        return Err(MotionError::InvalidParameters(
            "output array needs 2 elements".to_string(),
        ));
    }
    let direction = get_estimator(handle)?.direction_vector();
    env.set_float_array_region(out, 0, &direction.to_array())?;
    Ok(())
}

/// JNI: Report Display.getRotation() after a configuration change
#[no_mangle]
pub extern "C" fn Java_joaobapt_MotionProcessor_nativeSetDisplayRotation(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    rotation: jint,
) {
    if let Err(e) = set_display_rotation_impl(handle, rotation) {
        let _ = throw_java_exception(&mut env, &e);
    }
}

fn set_display_rotation_impl(handle: jlong, rotation: jint) -> MotionResult<()> {
    let rotation = DisplayRotation::from_index(rotation)?;
    let table = estimators();
    let entry = table.get(&handle).ok_or(MotionError::UnknownHandle(handle))?;
    entry.rotation.set(rotation);
    Ok(())
}

/// JNI: Stop processing and free the estimator. Unknown handles are ignored.
#[no_mangle]
pub extern "C" fn Java_joaobapt_MotionProcessor_nativeDispose(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    if !dispose_impl(handle) {
        debug!("Dispose of unknown handle {}", handle);
    }
}

fn dispose_impl(handle: jlong) -> bool {
    let entry = estimators().remove(&handle);
    match entry {
        Some(entry) => {
            entry.estimator.dispose();
            true
        }
        None => false,
    }
}

/// JNI: Activity teardown; disposes every estimator and cancels pending requests
#[no_mangle]
pub extern "C" fn Java_org_cocos2dx_cpp_AppActivity_nativeOnDestroy(_env: JNIEnv, _class: JClass) {
    let disposed: Vec<EstimatorEntry> = estimators().drain().map(|(_, entry)| entry).collect();
    for entry in disposed {
        entry.estimator.dispose();
    }
    RELAY.cancel_all("activity destroyed");
}

fn request_id(raw: jlong) -> MotionResult<RequestId> {
    u64::try_from(raw)
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| MotionError::InvalidParameters(format!("invalid request id {}", raw)))
}

fn log_relay_failure(kind: &str, result: MotionResult<()>) {
    if let Err(e) = result {
        warn!("Dropping {} callback: {}", kind, e);
    }
}

/// JNI: Alert dialog button pressed (DialogInterface.BUTTON_*)
#[no_mangle]
pub extern "C" fn Java_joaobapt_CommonAlertListener_nativeOnClick(
    _env: JNIEnv,
    _class: JClass,
    request: jlong,
    which: jint,
) {
    let result = request_id(request).and_then(|id| {
        let button = DialogButton::from_android(which)?;
        RELAY.dialogs.complete(id, Ok(button))
    });
    log_relay_failure("dialog", result);
}

/// JNI: Picture download finished; `data` is null on failure
#[no_mangle]
pub extern "C" fn Java_joaobapt_PictureDownloader_nativeOnPictureDownloaded(
    mut env: JNIEnv,
    _class: JClass,
    request: jlong,
    data: JByteArray,
    error_message: JString,
) {
    let result = on_picture_downloaded_impl(&mut env, request, &data, &error_message);
    log_relay_failure("picture", result);
}

fn on_picture_downloaded_impl(
    env: &mut JNIEnv,
    request: jlong,
    data: &JByteArray,
    error_message: &JString,
) -> MotionResult<()> {
    let id = request_id(request)?;
    let error = read_optional_string(env, error_message)?.unwrap_or_default();

    let outcome = if !error.is_empty() {
        Err(CollaboratorError::Failed(error))
    } else if data.is_null() {
        Err(CollaboratorError::Failed(
            "download returned no data".to_string(),
        ))
    } else {
        Ok(env.convert_byte_array(data)?)
    };
    RELAY.pictures.complete(id, outcome)
}

/// JNI: Login permission request finished
#[no_mangle]
pub extern "C" fn Java_joaobapt_FacebookManager_nativeOnLoginResult(
    mut env: JNIEnv,
    _class: JClass,
    request: jlong,
    state: jlong,
    error_message: JString,
) {
    let result = on_login_result_impl(&mut env, request, state, &error_message);
    log_relay_failure("login", result);
}

fn on_login_result_impl(
    env: &mut JNIEnv,
    request: jlong,
    state: jlong,
    error_message: &JString,
) -> MotionResult<()> {
    let id = request_id(request)?;
    let error = read_optional_string(env, error_message)?.unwrap_or_default();
    let state = PermissionState::from_code(state)?;
    RELAY.logins.complete(id, state.into_result(&error))
}

/// JNI: Graph request finished; `json` carries the response body
#[no_mangle]
pub extern "C" fn Java_joaobapt_RedirectToNativeCallback_nativeOnGraphResponse(
    mut env: JNIEnv,
    _class: JClass,
    request: jlong,
    json: JString,
    error_message: JString,
) {
    let result = on_graph_response_impl(&mut env, request, &json, &error_message);
    log_relay_failure("graph", result);
}

fn on_graph_response_impl(
    env: &mut JNIEnv,
    request: jlong,
    json: &JString,
    error_message: &JString,
) -> MotionResult<()> {
    let id = request_id(request)?;
    let body = read_optional_string(env, json)?;
    let error = read_optional_string(env, error_message)?.unwrap_or_default();
    RELAY.graph.complete(id, graph_result(body.as_deref(), &error))
}

/// JNI: Login session appeared or went away
#[no_mangle]
pub extern "C" fn Java_joaobapt_DirectorTracker_nativeOnAccessTokenChanged(
    _env: JNIEnv,
    _class: JClass,
    logged_in: jboolean,
) {
    RELAY.access_token_changed(logged_in != 0);
}
